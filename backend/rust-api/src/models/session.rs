use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::{Question, TestDefinition};

/// Option as shown to a student: no correctness flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperOption {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A question frozen at launch time together with its answer key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotQuestion {
    pub question_id: String,
    pub formulation: String,
    pub multiselect: bool,
    pub options: Vec<PaperOption>,
    /// Correct option ids, ascending.
    pub correct: Vec<u32>,
}

impl SnapshotQuestion {
    pub fn from_question(question: &Question) -> Self {
        Self {
            question_id: question.id.clone(),
            formulation: question.formulation.clone(),
            multiselect: question.multiselect,
            options: question
                .options
                .iter()
                .enumerate()
                .map(|(index, option)| PaperOption {
                    id: index as u32 + 1,
                    text: option.text.clone(),
                    image: option.image.clone(),
                })
                .collect(),
            correct: question.correct_option_ids(),
        }
    }

    pub fn has_option(&self, option_id: u32) -> bool {
        self.options.iter().any(|option| option.id == option_id)
    }
}

/// Answer key selected when the session was launched. Never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerKeySnapshot {
    pub questions: Vec<SnapshotQuestion>,
}

impl AnswerKeySnapshot {
    pub fn question(&self, question_id: &str) -> Option<&SnapshotQuestion> {
        self.questions
            .iter()
            .find(|question| question.question_id == question_id)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Student-facing view of the snapshot.
    pub fn paper(&self) -> Vec<PaperQuestion> {
        self.questions
            .iter()
            .map(|question| PaperQuestion {
                question_id: question.question_id.clone(),
                formulation: question.formulation.clone(),
                multiselect: question.multiselect,
                options: question.options.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperQuestion {
    pub question_id: String,
    pub formulation: String,
    pub multiselect: bool,
    pub options: Vec<PaperOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionOutcome {
    pub question_id: String,
    pub selected: Vec<u32>,
    pub correct: Vec<u32>,
    pub is_true: bool,
}

/// Graded submission of one student. Immutable once appended to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentResult {
    pub student_id: String,
    pub username: String,
    pub elapsed_seconds: u32,
    pub tasks_num: u32,
    pub right_answers_count: u32,
    pub questions: Vec<QuestionOutcome>,
    pub submitted_at: DateTime<Utc>,
}

/// One launch of a test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningSession {
    pub id: String,
    pub test_id: i64,
    pub test_name: String,
    pub subject_id: i64,
    pub lecturer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub is_running: bool,
    pub created_at: DateTime<Utc>,
    /// End of the submission window: launch time + test duration + grace period.
    pub closes_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub snapshot: AnswerKeySnapshot,
    #[serde(default)]
    pub results: Vec<StudentResult>,
}

impl RunningSession {
    pub fn new(
        test: &TestDefinition,
        lecturer_id: &str,
        comment: Option<String>,
        snapshot: AnswerKeySnapshot,
        created_at: DateTime<Utc>,
        grace: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            test_id: test.id,
            test_name: test.name.clone(),
            subject_id: test.subject_id,
            lecturer_id: lecturer_id.to_string(),
            comment,
            is_running: true,
            created_at,
            closes_at: created_at + Duration::seconds(i64::from(test.duration_seconds)) + grace,
            stopped_at: None,
            snapshot,
            results: Vec::new(),
        }
    }

    /// Running and still inside its submission window.
    pub fn accepts_submissions(&self, now: DateTime<Utc>) -> bool {
        self.is_running && now < self.closes_at
    }

    pub fn has_result_from(&self, student_id: &str) -> bool {
        self.results
            .iter()
            .any(|result| result.student_id == student_id)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            test_id: self.test_id,
            test_name: self.test_name.clone(),
            lecturer_id: self.lecturer_id.clone(),
            comment: self.comment.clone(),
            is_running: self.is_running,
            accepting_submissions: self.accepts_submissions(now),
            created_at: self.created_at,
            closes_at: self.closes_at,
            stopped_at: self.stopped_at,
            tasks_num: self.snapshot.len() as u32,
            results: self.sorted_results(),
        }
    }

    pub fn sorted_results(&self) -> Vec<StudentResult> {
        let mut results = self.results.clone();
        results.sort_by_key(|result| result.submitted_at);
        results
    }
}

/// Outward view of a session: no answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub test_id: i64,
    pub test_name: String,
    pub lecturer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub is_running: bool,
    pub accepting_submissions: bool,
    pub created_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub tasks_num: u32,
    pub results: Vec<StudentResult>,
}

/// Which tests to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListState {
    Running,
    NotRunning,
    #[default]
    All,
}

/// Per-test listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct TestListing {
    #[serde(flatten)]
    pub test: TestDefinition,
    pub questions_num: u64,
    pub is_running: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub running_sessions: Vec<RunningRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningRef {
    pub session_id: String,
    pub lecturer_id: String,
    pub closes_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub session_id: String,
    pub is_running: bool,
    pub message: String,
}
