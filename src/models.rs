use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Zero-based position of a question in `ParsedFormsData::questions`.
pub type QuestionIndex = usize;
/// The `ID` column of a respondent record.
pub type ResponseId = u64;
/// `Some(true)` satisfied, `Some(false)` not satisfied, `None` ungraded.
pub type ScoreValue = Option<bool>;
/// questionIndex -> responseId -> automatically correct.
pub type AutoCorrectMask = BTreeMap<QuestionIndex, BTreeMap<ResponseId, bool>>;

/// One respondent row. Fixed columns keep the export's header names on disk;
/// every question column is flattened alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormsResponse {
    #[serde(rename = "ID", deserialize_with = "lenient_response_id")]
    pub id: ResponseId,
    #[serde(rename = "開始時刻", default)]
    pub started_at: String,
    #[serde(rename = "完了時刻", default)]
    pub completed_at: String,
    #[serde(rename = "メール", default)]
    pub email: String,
    #[serde(rename = "名前", default)]
    pub name: String,
    #[serde(flatten)]
    pub answers: BTreeMap<String, Value>,
}

impl FormsResponse {
    pub fn answer(&self, question: &str) -> Option<&Value> {
        self.answers.get(question)
    }

    /// Answer rendered as text; numbers are printed, missing answers are empty.
    pub fn answer_text(&self, question: &str) -> String {
        match self.answers.get(question) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// Exports with a non-numeric ID column store `null` (or text) there. Numeric
/// text is parsed; anything else is filed under ID 0 so the document still loads.
fn lenient_response_id<'de, D>(deserializer: D) -> Result<ResponseId, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| *n >= 0.0 && n.fract() == 0.0).map(|n| n as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(|| {
        tracing::warn!(id = %raw, "respondent ID is not a number; filed under 0");
        0
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFormsData {
    pub total_responses: usize,
    pub questions: Vec<String>,
    pub responses: Vec<FormsResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_correct_mask: Option<AutoCorrectMask>,
}

impl ParsedFormsData {
    pub fn new(questions: Vec<String>, responses: Vec<FormsResponse>) -> Self {
        Self {
            total_responses: responses.len(),
            questions,
            responses,
            auto_correct_mask: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringCriterion {
    pub id: String,
    pub description: String,
    pub max_score: u32,
}

impl ScoringCriterion {
    /// Builds a criterion with a freshly allocated id. Ids are never reassigned
    /// afterwards; edits keep the id and only change the other fields.
    pub fn new(description: impl Into<String>, max_score: u32) -> Self {
        Self {
            id: new_criterion_id(Utc::now()),
            description: description.into(),
            max_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionScoringCriteria {
    pub question_index: QuestionIndex,
    pub question_text: String,
    pub criteria: Vec<ScoringCriterion>,
}

/// questionIndex -> responseId -> criterionId -> tri-state mark.
///
/// A missing cell and a `null` cell both mean "ungraded".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreMatrix(BTreeMap<QuestionIndex, BTreeMap<ResponseId, BTreeMap<String, ScoreValue>>>);

impl ScoreMatrix {
    /// Criterion cells for one (question, response) pair, creating the
    /// intermediate maps on first use.
    pub fn cells_mut(
        &mut self,
        question_index: QuestionIndex,
        response_id: ResponseId,
    ) -> &mut BTreeMap<String, ScoreValue> {
        self.0
            .entry(question_index)
            .or_default()
            .entry(response_id)
            .or_default()
    }

    pub fn set(
        &mut self,
        question_index: QuestionIndex,
        response_id: ResponseId,
        criterion_id: &str,
        value: ScoreValue,
    ) {
        self.cells_mut(question_index, response_id)
            .insert(criterion_id.to_string(), value);
    }

    /// The stored cell. Outer `None` means no cell exists, inner `None` a stored null.
    pub fn cell(
        &self,
        question_index: QuestionIndex,
        response_id: ResponseId,
        criterion_id: &str,
    ) -> Option<ScoreValue> {
        self.0
            .get(&question_index)?
            .get(&response_id)?
            .get(criterion_id)
            .copied()
    }

    /// Mark for a cell, with absent and null collapsed to `None`.
    pub fn value(
        &self,
        question_index: QuestionIndex,
        response_id: ResponseId,
        criterion_id: &str,
    ) -> ScoreValue {
        self.cell(question_index, response_id, criterion_id).flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// questionIndex -> responseId -> latest comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentMap(BTreeMap<QuestionIndex, BTreeMap<ResponseId, String>>);

impl CommentMap {
    pub fn set(&mut self, question_index: QuestionIndex, response_id: ResponseId, comment: String) {
        self.0
            .entry(question_index)
            .or_default()
            .insert(response_id, comment);
    }

    pub fn get(&self, question_index: QuestionIndex, response_id: ResponseId) -> Option<&str> {
        self.0
            .get(&question_index)?
            .get(&response_id)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub forms_data: ParsedFormsData,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_criteria: Option<Vec<QuestionScoringCriteria>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreMatrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<CommentMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_titles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_correct_mask: Option<AutoCorrectMask>,
}

impl Workspace {
    pub fn summary(&self) -> WorkspaceSummary {
        WorkspaceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            file_name: self.file_name.clone(),
            total_responses: self.forms_data.total_responses,
            total_questions: self.forms_data.questions.len(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Mask imported with the response table, else the workspace-level one.
    pub fn auto_correct_mask(&self) -> Option<&AutoCorrectMask> {
        self.forms_data
            .auto_correct_mask
            .as_ref()
            .or(self.auto_correct_mask.as_ref())
    }

    pub fn criteria_for(&self, question_index: QuestionIndex) -> Option<&QuestionScoringCriteria> {
        self.scoring_criteria
            .as_deref()?
            .iter()
            .find(|entry| entry.question_index == question_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_name: String,
    pub total_responses: usize,
    pub total_questions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_name: String,
    pub forms_data: ParsedFormsData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkspaceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    pub question_index: QuestionIndex,
    pub response_id: ResponseId,
    pub criterion_id: String,
    pub value: ScoreValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentUpdate {
    pub question_index: QuestionIndex,
    pub response_id: ResponseId,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReimportSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total_responses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReimportOutcome {
    Applied(ReimportSummary),
    /// Question sets differ; nothing was written.
    Rejected { errors: Vec<String> },
    NotFound,
}

impl ReimportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

pub(crate) fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub(crate) fn random_base36(len: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| DIGITS[rng.random_range(0..DIGITS.len())] as char)
        .collect()
}

fn new_criterion_id(now: DateTime<Utc>) -> String {
    format!(
        "criterion_{}_{}",
        now.timestamp_millis().max(0),
        random_base36(6)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_round_trips_export_columns() {
        let raw = json!({
            "ID": 7,
            "開始時刻": "2024/05/01 10:00",
            "完了時刻": "2024/05/01 10:20",
            "メール": "s1234@example.ac.jp",
            "名前": "Sato",
            "Q1": "answer one",
            "Q2": 42
        });
        let response: FormsResponse = serde_json::from_value(raw.clone()).expect("response");
        assert_eq!(response.id, 7);
        assert_eq!(response.email, "s1234@example.ac.jp");
        assert_eq!(response.answer_text("Q1"), "answer one");
        assert_eq!(response.answer_text("Q2"), "42");
        assert_eq!(response.answer_text("Q3"), "");
        assert_eq!(serde_json::to_value(&response).expect("serialize"), raw);
    }

    #[test]
    fn non_numeric_ids_still_load() {
        let parse = |id: Value| -> FormsResponse {
            serde_json::from_value(json!({ "ID": id, "メール": "t1@example.ac.jp", "Q1": "a" }))
                .expect("response")
        };
        assert_eq!(parse(json!(null)).id, 0);
        assert_eq!(parse(json!("T-17")).id, 0);
        assert_eq!(parse(json!(" 42 ")).id, 42);
        assert_eq!(parse(json!(12.0)).id, 12);
        assert_eq!(parse(json!(null)).answer_text("Q1"), "a");
    }

    #[test]
    fn score_matrix_keeps_null_distinct_from_absent() {
        let mut scores = ScoreMatrix::default();
        scores.set(0, 1, "c1", None);
        scores.set(0, 1, "c2", Some(false));

        assert_eq!(scores.cell(0, 1, "c1"), Some(None));
        assert_eq!(scores.cell(0, 1, "c3"), None);
        assert_eq!(scores.value(0, 1, "c2"), Some(false));

        let encoded = serde_json::to_value(&scores).expect("serialize");
        assert_eq!(encoded, json!({ "0": { "1": { "c1": null, "c2": false } } }));
        let decoded: ScoreMatrix = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, scores);
    }

    #[test]
    fn legacy_document_without_optional_sections_parses() {
        let raw = json!({
            "id": "ws_legacy_abc123",
            "name": "Midterm",
            "createdAt": "2024-05-01T10:00:00.000Z",
            "updatedAt": "2024-05-02T10:00:00.000Z",
            "fileName": "midterm.xlsx",
            "formsData": { "totalResponses": 0, "questions": ["Q1"], "responses": [] }
        });
        let workspace: Workspace = serde_json::from_value(raw).expect("workspace");
        assert!(workspace.scores.is_none());
        assert!(workspace.criteria_for(0).is_none());
        assert_eq!(workspace.summary().total_questions, 1);
    }

    #[test]
    fn response_table_mask_takes_precedence() {
        let mut data = ParsedFormsData::new(vec!["Q1".to_string()], Vec::new());
        data.auto_correct_mask = Some(BTreeMap::from([(0, BTreeMap::from([(1, true)]))]));
        let now = Utc::now();
        let workspace = Workspace {
            id: "ws_a_b".to_string(),
            name: "n".to_string(),
            description: None,
            created_at: now,
            updated_at: now,
            forms_data: data,
            file_name: "f.xlsx".to_string(),
            scoring_criteria: None,
            scores: None,
            comments: None,
            question_titles: None,
            auto_correct_mask: Some(BTreeMap::new()),
        };
        let mask = workspace.auto_correct_mask().expect("mask");
        assert_eq!(mask.get(&0).and_then(|row| row.get(&1)), Some(&true));
    }

    #[test]
    fn criterion_ids_are_prefixed_and_distinct() {
        let first = ScoringCriterion::new("mentions ownership", 2);
        let second = ScoringCriterion::new("mentions ownership", 2);
        assert!(first.id.starts_with("criterion_"));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn base36_matches_known_values() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(random_base36(6).len(), 6);
    }
}
