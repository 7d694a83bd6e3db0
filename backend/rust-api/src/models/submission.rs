use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::session::{AnswerKeySnapshot, PaperQuestion};

/// Open attempt of a student on a running session. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingSubmission {
    pub session_id: String,
    pub student_id: String,
    pub username: String,
    pub test_name: String,
    pub snapshot: AnswerKeySnapshot,
    pub started_at: DateTime<Utc>,
    /// Submission deadline of the session.
    pub deadline: DateTime<Utc>,
    /// When the stored entry is reclaimed if never submitted.
    pub expires_at: DateTime<Utc>,
}

impl PendingSubmission {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds().max(0)
    }

    pub fn status(&self, now: DateTime<Utc>) -> PendingStatus {
        PendingStatus {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            deadline: self.deadline,
            remaining_seconds: self.remaining_seconds(now),
        }
    }

    pub fn key(session_id: &str, student_id: &str) -> String {
        format!("pending:{}:{}", session_id, student_id)
    }
}

/// Selection for one question: a single option id or a set of ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawAnswer {
    Single(u32),
    Multiple(Vec<u32>),
}

/// Raw payload keyed by question id. Questions absent from the map are unanswered.
pub type RawAnswers = HashMap<String, RawAnswer>;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswersRequest {
    #[serde(default)]
    pub answers: RawAnswers,
    #[validate(range(max = 86400))]
    pub elapsed_seconds: u32,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct LaunchRequest {
    #[validate(length(max = 500))]
    pub comment: Option<String>,
}

/// Response to `begin`: the paper to render and the attempt deadline.
#[derive(Debug, Serialize, Deserialize)]
pub struct BeginResponse {
    pub session_id: String,
    pub test_name: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub questions: Vec<PaperQuestion>,
}

impl BeginResponse {
    pub fn from_pending(pending: &PendingSubmission, now: DateTime<Utc>) -> Self {
        Self {
            session_id: pending.session_id.clone(),
            test_name: pending.test_name.clone(),
            started_at: pending.started_at,
            deadline: pending.deadline,
            remaining_seconds: pending.remaining_seconds(now),
            questions: pending.snapshot.paper(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingStatus {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: i64,
}
