//! Reimport checks: question-set compatibility and the email-keyed response diff.

use crate::models::{FormsResponse, ParsedFormsData};
use std::collections::HashMap;

/// Responses keyed by email, split by how they changed between two imports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataDiff {
    pub added: Vec<FormsResponse>,
    pub removed: Vec<FormsResponse>,
    pub updated: Vec<FormsResponse>,
}

impl DataDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    pub fn summary(&self) -> String {
        let parts = [
            ("added", self.added.len()),
            ("updated", self.updated.len()),
            ("removed", self.removed.len()),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(label, count)| format!("{label}: {count}"))
        .collect::<Vec<_>>();
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Every discrepancy between the two question lists. Empty means compatible.
pub fn compatibility_errors(existing: &ParsedFormsData, incoming: &ParsedFormsData) -> Vec<String> {
    let mut errors = Vec::new();
    let old = &existing.questions;
    let new = &incoming.questions;

    if old.len() != new.len() {
        errors.push(format!(
            "question count differs: existing {}, new {}",
            old.len(),
            new.len()
        ));
    }

    for index in 0..old.len().max(new.len()) {
        let position = index + 1;
        match (old.get(index), new.get(index)) {
            (None, Some(added)) => {
                errors.push(format!("question {position}: new data has an extra question \"{added}\""))
            }
            (Some(missing), None) => errors.push(format!(
                "question {position}: existing question is missing from new data \"{missing}\""
            )),
            (Some(before), Some(after)) if before != after => errors.push(format!(
                "question {position}: question text differs\nexisting: \"{before}\"\nnew: \"{after}\""
            )),
            _ => {}
        }
    }

    errors
}

pub fn detect_differences(existing: &ParsedFormsData, incoming: &ParsedFormsData) -> DataDiff {
    let old_by_email = index_by_email(&existing.responses);
    let new_by_email = index_by_email(&incoming.responses);

    let mut diff = DataDiff::default();
    for response in &incoming.responses {
        match old_by_email.get(response.email.as_str()) {
            None => diff.added.push(response.clone()),
            Some(previous) if !same_response(previous, response, &existing.questions) => {
                diff.updated.push(response.clone())
            }
            Some(_) => {}
        }
    }
    for response in &existing.responses {
        if !new_by_email.contains_key(response.email.as_str()) {
            diff.removed.push(response.clone());
        }
    }
    diff
}

/// Old responses minus removed, updated ones replaced in place, added ones appended.
///
/// Later duplicates of an email win, matching the diff's own keying.
pub fn merge_responses(existing: &[FormsResponse], diff: &DataDiff) -> Vec<FormsResponse> {
    let mut merged: Vec<FormsResponse> = Vec::with_capacity(existing.len() + diff.added.len());
    let mut slots: HashMap<String, usize> = HashMap::new();

    let mut put = |merged: &mut Vec<FormsResponse>, response: &FormsResponse| {
        match slots.get(&response.email) {
            Some(&slot) => merged[slot] = response.clone(),
            None => {
                slots.insert(response.email.clone(), merged.len());
                merged.push(response.clone());
            }
        }
    };

    for response in existing {
        let removed = diff.removed.iter().any(|gone| gone.email == response.email);
        if !removed {
            put(&mut merged, response);
        }
    }
    for response in diff.updated.iter().chain(diff.added.iter()) {
        put(&mut merged, response);
    }
    merged
}

fn index_by_email(responses: &[FormsResponse]) -> HashMap<&str, &FormsResponse> {
    responses
        .iter()
        .map(|response| (response.email.as_str(), response))
        .collect()
}

fn same_response(left: &FormsResponse, right: &FormsResponse, questions: &[String]) -> bool {
    left.email == right.email
        && left.name == right.name
        && left.completed_at == right.completed_at
        && questions
            .iter()
            .all(|question| left.answer(question) == right.answer(question))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn response(id: u64, email: &str, answer: &str) -> FormsResponse {
        FormsResponse {
            id,
            started_at: "2024/05/01 10:00".to_string(),
            completed_at: "2024/05/01 10:20".to_string(),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            answers: BTreeMap::from([("Q1".to_string(), Value::String(answer.to_string()))]),
        }
    }

    fn data(questions: &[&str], responses: Vec<FormsResponse>) -> ParsedFormsData {
        ParsedFormsData::new(questions.iter().map(|q| q.to_string()).collect(), responses)
    }

    #[test]
    fn identical_question_lists_are_compatible() {
        let existing = data(&["Q1", "Q2"], Vec::new());
        assert!(compatibility_errors(&existing, &existing.clone()).is_empty());
    }

    #[test]
    fn changed_text_and_count_are_reported_per_position() {
        let existing = data(&["a", "b"], Vec::new());
        let errors = compatibility_errors(&existing, &data(&["a", "c"], Vec::new()));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("question 2: question text differs"));

        let errors = compatibility_errors(&existing, &data(&["a", "b", "d"], Vec::new()));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("question count differs"));
        assert!(errors[1].contains("extra question \"d\""));

        let errors = compatibility_errors(&existing, &data(&["a"], Vec::new()));
        assert!(errors[1].contains("missing from new data \"b\""));
    }

    #[test]
    fn diff_classifies_by_email() {
        let existing = data(
            &["Q1"],
            vec![response(1, "x@e", "old"), response(2, "z@e", "same")],
        );
        let incoming = data(
            &["Q1"],
            vec![
                response(10, "x@e", "new"),
                response(11, "y@e", "fresh"),
                response(12, "z@e", "same"),
            ],
        );
        let diff = detect_differences(&existing, &incoming);
        assert_eq!(diff.updated.iter().map(|r| r.id).collect::<Vec<_>>(), vec![10]);
        assert_eq!(diff.added.iter().map(|r| r.id).collect::<Vec<_>>(), vec![11]);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.summary(), "added: 1, updated: 1");
    }

    #[test]
    fn start_time_and_id_changes_are_not_updates() {
        let existing = data(&["Q1"], vec![response(1, "x@e", "same")]);
        let mut renumbered = response(9, "x@e", "same");
        renumbered.started_at = "2024/06/01 09:00".to_string();
        let diff = detect_differences(&existing, &data(&["Q1"], vec![renumbered]));
        assert!(diff.is_empty());
        assert_eq!(diff.summary(), "no changes");
    }

    #[test]
    fn merge_keeps_order_replaces_updated_and_appends_added() {
        let existing = vec![
            response(1, "x@e", "old"),
            response(2, "gone@e", "bye"),
            response(3, "z@e", "keep"),
        ];
        let diff = DataDiff {
            added: vec![response(11, "y@e", "fresh")],
            removed: vec![response(2, "gone@e", "bye")],
            updated: vec![response(10, "x@e", "new")],
        };
        let merged = merge_responses(&existing, &diff);
        let ids = merged.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![10, 3, 11]);
        assert_eq!(merged[0].answer_text("Q1"), "new");
    }
}
