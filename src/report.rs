use crate::models::{QuestionIndex, ResponseId, ScoreMatrix, Workspace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static STUDENT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]+([0-9]+)").expect("valid student number regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionScore {
    pub question_index: QuestionIndex,
    pub title: String,
    pub awarded: u32,
    pub attainable: u32,
    /// Criteria still without a mark for this respondent.
    pub ungraded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentScore {
    pub response_id: ResponseId,
    pub student_number: String,
    pub name: String,
    pub email: String,
    pub questions: Vec<QuestionScore>,
    pub total: u32,
    pub total_attainable: u32,
}

/// Digits after the leading letters of an email, e.g. `s1234@...` -> `1234`.
pub fn student_number(email: &str) -> String {
    STUDENT_NUMBER
        .captures(email)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Title shown for a question: the override when the override list lines up
/// with the questions and the entry is non-empty, the question text otherwise.
pub fn display_title(workspace: &Workspace, question_index: QuestionIndex) -> String {
    let questions = &workspace.forms_data.questions;
    workspace
        .question_titles
        .as_ref()
        .filter(|titles| titles.len() == questions.len())
        .and_then(|titles| titles.get(question_index))
        .filter(|title| !title.is_empty())
        .or_else(|| questions.get(question_index))
        .cloned()
        .unwrap_or_default()
}

/// Per-respondent totals. Only `true` marks award points; questions without
/// criteria are listed with zero attainable points.
pub fn student_scores(workspace: &Workspace) -> Vec<StudentScore> {
    let empty = ScoreMatrix::default();
    let scores = workspace.scores.as_ref().unwrap_or(&empty);

    workspace
        .forms_data
        .responses
        .iter()
        .map(|response| {
            let questions = (0..workspace.forms_data.questions.len())
                .map(|question_index| {
                    let mut line = QuestionScore {
                        question_index,
                        title: display_title(workspace, question_index),
                        awarded: 0,
                        attainable: 0,
                        ungraded: 0,
                    };
                    let criteria = workspace
                        .criteria_for(question_index)
                        .map(|entry| entry.criteria.as_slice())
                        .unwrap_or_default();
                    for criterion in criteria {
                        line.attainable += criterion.max_score;
                        match scores.value(question_index, response.id, &criterion.id) {
                            Some(true) => line.awarded += criterion.max_score,
                            Some(false) => {}
                            None => line.ungraded += 1,
                        }
                    }
                    line
                })
                .collect::<Vec<_>>();

            StudentScore {
                response_id: response.id,
                student_number: student_number(&response.email),
                name: response.name.clone(),
                email: response.email.clone(),
                total: questions.iter().map(|q| q.awarded).sum(),
                total_attainable: questions.iter().map(|q| q.attainable).sum(),
                questions,
            }
        })
        .collect()
}
