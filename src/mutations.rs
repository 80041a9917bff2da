//! Fine-grained updates. Each one runs as a single serialized
//! read-modify-write on the workspace document and touches only its own slice.

use crate::data_diff::{compatibility_errors, detect_differences, merge_responses};
use crate::errors::AppResult;
use crate::models::{
    CommentUpdate, ParsedFormsData, QuestionScoringCriteria, ReimportOutcome, ReimportSummary, ScoreUpdate,
    Workspace,
};
use crate::store::{Edit, WorkspaceStore};
use std::collections::{HashMap, HashSet};

impl WorkspaceStore {
    /// Sets one score cell. Coordinates are not checked against the criteria
    /// or the response table.
    pub async fn upsert_score(&self, id: &str, update: ScoreUpdate) -> AppResult<Option<Workspace>> {
        tracing::debug!(
            workspace_id = %id,
            question_index = update.question_index,
            response_id = update.response_id,
            criterion_id = %update.criterion_id,
            value = ?update.value,
            "score upsert"
        );
        self.mutate(id, |workspace| apply_score(workspace, &update)).await
    }

    /// Sets one comment, replacing any previous text. An empty string clears it.
    pub async fn upsert_comment(&self, id: &str, update: CommentUpdate) -> AppResult<Option<Workspace>> {
        tracing::debug!(
            workspace_id = %id,
            question_index = update.question_index,
            response_id = update.response_id,
            "comment upsert"
        );
        self.mutate(id, |workspace| apply_comment(workspace, update)).await
    }

    /// Replaces every question's criteria and seeds score cells for criteria
    /// that did not exist before.
    pub async fn replace_scoring_criteria(
        &self,
        id: &str,
        criteria: Vec<QuestionScoringCriteria>,
    ) -> AppResult<Option<Workspace>> {
        tracing::debug!(workspace_id = %id, questions = criteria.len(), "scoring criteria replace");
        self.mutate(id, |workspace| replace_criteria(workspace, criteria)).await
    }

    /// Stores display titles, padded with empty strings or truncated to the question count.
    pub async fn set_question_titles(&self, id: &str, titles: Vec<String>) -> AppResult<Option<Workspace>> {
        self.mutate(id, |workspace| {
            let count = workspace.forms_data.questions.len();
            workspace.question_titles = Some(normalize_titles(titles, count));
        })
        .await
    }

    /// Merges a fresh export into the workspace, keyed by respondent email.
    ///
    /// The question list must match exactly, position by position; otherwise
    /// nothing is written and the discrepancies are returned.
    pub async fn reimport(&self, id: &str, data: ParsedFormsData, file_name: String) -> AppResult<ReimportOutcome> {
        let edited = self
            .edit(id, |workspace| apply_reimport(workspace, data, file_name))
            .await?;
        let Some((_, outcome)) = edited else {
            return Ok(ReimportOutcome::NotFound);
        };
        match &outcome {
            ReimportOutcome::Applied(summary) => tracing::info!(
                workspace_id = %id,
                added = summary.added,
                updated = summary.updated,
                removed = summary.removed,
                total = summary.total_responses,
                "reimport applied"
            ),
            ReimportOutcome::Rejected { errors } => tracing::info!(
                workspace_id = %id,
                discrepancies = errors.len(),
                "reimport rejected: question set differs"
            ),
            ReimportOutcome::NotFound => {}
        }
        Ok(outcome)
    }
}

pub(crate) fn apply_score(workspace: &mut Workspace, update: &ScoreUpdate) {
    workspace.scores.get_or_insert_with(Default::default).set(
        update.question_index,
        update.response_id,
        &update.criterion_id,
        update.value,
    );
}

pub(crate) fn apply_comment(workspace: &mut Workspace, update: CommentUpdate) {
    workspace.comments.get_or_insert_with(Default::default).set(
        update.question_index,
        update.response_id,
        update.comment,
    );
}

/// Existing criteria keep their cells untouched. For each newly added
/// criterion, every response gets a cell: `true` where the auto-correct mask
/// marks it, otherwise null. Cells that already hold a mark are left alone.
pub(crate) fn replace_criteria(workspace: &mut Workspace, criteria: Vec<QuestionScoringCriteria>) {
    let previous: HashMap<usize, HashSet<&str>> = workspace
        .scoring_criteria
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|entry| {
            (
                entry.question_index,
                entry.criteria.iter().map(|criterion| criterion.id.as_str()).collect(),
            )
        })
        .collect();

    let mask = workspace.auto_correct_mask();
    let mut scores = workspace.scores.clone().unwrap_or_default();
    for entry in &criteria {
        let known = previous.get(&entry.question_index);
        let auto_correct = mask.and_then(|mask| mask.get(&entry.question_index));
        for criterion in &entry.criteria {
            if known.is_some_and(|ids| ids.contains(criterion.id.as_str())) {
                continue;
            }
            for response in &workspace.forms_data.responses {
                let seeded = auto_correct
                    .and_then(|row| row.get(&response.id))
                    .copied()
                    .unwrap_or(false);
                let cell = scores
                    .cells_mut(entry.question_index, response.id)
                    .entry(criterion.id.clone())
                    .or_insert(None);
                if cell.is_none() {
                    *cell = seeded.then_some(true);
                }
            }
        }
    }

    workspace.scores = Some(scores);
    workspace.scoring_criteria = Some(criteria);
}

pub(crate) fn normalize_titles(mut titles: Vec<String>, question_count: usize) -> Vec<String> {
    titles.resize(question_count, String::new());
    titles
}

fn apply_reimport(workspace: &mut Workspace, data: ParsedFormsData, file_name: String) -> Edit<ReimportOutcome> {
    let errors = compatibility_errors(&workspace.forms_data, &data);
    if !errors.is_empty() {
        return Edit::Discard(ReimportOutcome::Rejected { errors });
    }

    let diff = detect_differences(&workspace.forms_data, &data);
    let renumbered = diff
        .updated
        .iter()
        .filter(|incoming| {
            workspace
                .forms_data
                .responses
                .iter()
                .any(|existing| existing.email == incoming.email && existing.id != incoming.id)
        })
        .count();
    if renumbered > 0 {
        tracing::warn!(
            workspace_id = %workspace.id,
            renumbered,
            "reimport assigns new response ids; marks and comments under the old ids are orphaned"
        );
    }
    tracing::debug!(workspace_id = %workspace.id, diff = %diff.summary(), "reimport diff");

    let responses = merge_responses(&workspace.forms_data.responses, &diff);
    let summary = ReimportSummary {
        added: diff.added.len(),
        updated: diff.updated.len(),
        removed: diff.removed.len(),
        total_responses: responses.len(),
    };
    workspace.forms_data = ParsedFormsData {
        total_responses: responses.len(),
        responses,
        ..data
    };
    workspace.file_name = file_name;
    Edit::Commit(ReimportOutcome::Applied(summary))
}
