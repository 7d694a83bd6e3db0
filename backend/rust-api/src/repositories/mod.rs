//! Storage seams of the session workflow.
//!
//! `mongo`/`redis_pending` back the production deployment; `memory` keeps everything in
//! process and is used for local runs and the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QuizError;
use crate::models::{PendingSubmission, Question, RunningSession, StudentResult, TestDefinition};

pub mod memory;
pub mod mongo;
pub mod redis_pending;

pub use memory::{MemoryCatalog, MemoryPendingStore, MemorySessionStore};
pub use mongo::{MongoCatalog, MongoSessionStore};
pub use redis_pending::RedisPendingStore;

/// Tests and their question banks.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_test(&self, test_id: i64) -> Result<Option<TestDefinition>, QuizError>;

    async fn list_tests(&self) -> Result<Vec<TestDefinition>, QuizError>;

    async fn list_questions(&self, test_id: i64) -> Result<Vec<Question>, QuizError>;

    async fn count_questions(&self, test_id: i64) -> Result<u64, QuizError>;

    async fn save_test(&self, test: TestDefinition) -> Result<(), QuizError>;

    /// Inserts or replaces a question by id. Invalid questions are rejected.
    async fn save_question(&self, question: Question) -> Result<(), QuizError>;

    async fn ping(&self) -> Result<(), QuizError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(RunningSession),
    AlreadyStopped,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended { test_id: i64, results_count: usize },
    /// Session stopped or its submission window elapsed.
    Closed,
    /// The student already has a result in this session.
    Duplicate,
    NotFound,
}

/// Filter for lecturer-scoped session queries.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub test_id: Option<i64>,
    pub is_running: Option<bool>,
}

impl SessionFilter {
    pub fn matches(&self, session: &RunningSession) -> bool {
        self.test_id.map_or(true, |test_id| session.test_id == test_id)
            && self
                .is_running
                .map_or(true, |is_running| session.is_running == is_running)
    }
}

/// Running sessions and their result lists.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Stores `session` as running, stopping any session already running for the
    /// same (test, lecturer) in the same operation. Returns the stopped sessions.
    async fn launch(&self, session: RunningSession) -> Result<Vec<RunningSession>, QuizError>;

    async fn get(&self, session_id: &str) -> Result<Option<RunningSession>, QuizError>;

    async fn stop(
        &self,
        session_id: &str,
        lecturer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<StopOutcome, QuizError>;

    /// Appends only if the session is running, `now` is before `closes_at` and
    /// the student has no result yet.
    async fn append_result(
        &self,
        session_id: &str,
        result: StudentResult,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome, QuizError>;

    async fn list_running(&self) -> Result<Vec<RunningSession>, QuizError>;

    /// Lecturer's sessions, newest first.
    async fn list_for_lecturer(
        &self,
        lecturer_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<RunningSession>, QuizError>;

    /// Flips every running session whose window elapsed to stopped.
    async fn close_expired(&self, now: DateTime<Utc>) -> Result<Vec<RunningSession>, QuizError>;

    async fn ping(&self) -> Result<(), QuizError>;
}

/// Per-student scratch state, keyed by (session, student).
#[async_trait]
pub trait PendingRepository: Send + Sync {
    /// Stores the entry unless a live one exists for the key. `false` when one does.
    async fn insert(&self, pending: &PendingSubmission) -> Result<bool, QuizError>;

    async fn get(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<PendingSubmission>, QuizError>;

    /// Removes and returns the entry. At most one caller observes `Some`.
    async fn take(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<PendingSubmission>, QuizError>;

    async fn remove(&self, session_id: &str, student_id: &str) -> Result<bool, QuizError>;

    /// Drops entries past their expiry. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, QuizError>;

    async fn ping(&self) -> Result<(), QuizError>;
}
