use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::models::{AnswerKeySnapshot, QuestionOutcome, StudentResult};

/// Validated selections keyed by question id.
pub type SelectedAnswers = HashMap<String, BTreeSet<u32>>;

/// Who is being graded and when.
#[derive(Debug, Clone)]
pub struct Submitter<'a> {
    pub student_id: &'a str,
    pub username: &'a str,
    pub submitted_at: DateTime<Utc>,
}

/// Grades `selected` against `snapshot`.
///
/// A question counts as correct only when the selected set equals the correct
/// set exactly; there is no partial credit. Questions missing from `selected`
/// are graded as empty selections. Pure: the result depends on the inputs only.
pub fn grade(
    snapshot: &AnswerKeySnapshot,
    selected: &SelectedAnswers,
    elapsed_seconds: u32,
    submitter: Submitter<'_>,
) -> StudentResult {
    let questions: Vec<QuestionOutcome> = snapshot
        .questions
        .iter()
        .map(|question| {
            let chosen: Vec<u32> = selected
                .get(&question.question_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            let correct: BTreeSet<u32> = question.correct.iter().copied().collect();
            let is_true = chosen.iter().copied().collect::<BTreeSet<u32>>() == correct;

            QuestionOutcome {
                question_id: question.question_id.clone(),
                selected: chosen,
                correct: correct.into_iter().collect(),
                is_true,
            }
        })
        .collect();

    let right_answers_count = questions.iter().filter(|q| q.is_true).count() as u32;

    StudentResult {
        student_id: submitter.student_id.to_string(),
        username: submitter.username.to_string(),
        elapsed_seconds,
        tasks_num: questions.len() as u32,
        right_answers_count,
        questions,
        submitted_at: submitter.submitted_at,
    }
}
