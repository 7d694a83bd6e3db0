use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    AppendOutcome, CatalogRepository, PendingRepository, SessionFilter, SessionRepository,
    StopOutcome,
};
use crate::error::QuizError;
use crate::models::{PendingSubmission, Question, RunningSession, StudentResult, TestDefinition};

#[derive(Default)]
struct CatalogData {
    tests: HashMap<i64, TestDefinition>,
    // Insertion order is kept so listings are stable.
    questions: Vec<Question>,
}

/// In-process catalog.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<Mutex<CatalogData>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn get_test(&self, test_id: i64) -> Result<Option<TestDefinition>, QuizError> {
        Ok(self.inner.lock().await.tests.get(&test_id).cloned())
    }

    async fn list_tests(&self) -> Result<Vec<TestDefinition>, QuizError> {
        let data = self.inner.lock().await;
        let mut tests: Vec<_> = data.tests.values().cloned().collect();
        tests.sort_by_key(|test| test.id);
        Ok(tests)
    }

    async fn list_questions(&self, test_id: i64) -> Result<Vec<Question>, QuizError> {
        let data = self.inner.lock().await;
        Ok(data
            .questions
            .iter()
            .filter(|question| question.test_id == test_id)
            .cloned()
            .collect())
    }

    async fn count_questions(&self, test_id: i64) -> Result<u64, QuizError> {
        let data = self.inner.lock().await;
        Ok(data
            .questions
            .iter()
            .filter(|question| question.test_id == test_id)
            .count() as u64)
    }

    async fn save_test(&self, test: TestDefinition) -> Result<(), QuizError> {
        self.inner.lock().await.tests.insert(test.id, test);
        Ok(())
    }

    async fn save_question(&self, question: Question) -> Result<(), QuizError> {
        question.validate()?;
        let mut data = self.inner.lock().await;
        match data
            .questions
            .iter_mut()
            .find(|existing| existing.id == question.id)
        {
            Some(existing) => *existing = question,
            None => data.questions.push(question),
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), QuizError> {
        Ok(())
    }
}

/// In-process session store. Every operation runs under one lock, which
/// serializes stop, launch and result appends per store.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<String, RunningSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionStore {
    async fn launch(&self, session: RunningSession) -> Result<Vec<RunningSession>, QuizError> {
        let mut sessions = self.sessions.lock().await;

        let mut superseded = Vec::new();
        for existing in sessions.values_mut() {
            if existing.is_running
                && existing.test_id == session.test_id
                && existing.lecturer_id == session.lecturer_id
            {
                existing.is_running = false;
                existing.stopped_at = Some(session.created_at);
                superseded.push(existing.clone());
            }
        }

        sessions.insert(session.id.clone(), session);
        Ok(superseded)
    }

    async fn get(&self, session_id: &str) -> Result<Option<RunningSession>, QuizError> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn stop(
        &self,
        session_id: &str,
        lecturer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<StopOutcome, QuizError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions
            .get_mut(session_id)
            .filter(|session| session.lecturer_id == lecturer_id)
        else {
            return Ok(StopOutcome::NotFound);
        };

        if !session.is_running {
            return Ok(StopOutcome::AlreadyStopped);
        }

        session.is_running = false;
        session.stopped_at = Some(at);
        Ok(StopOutcome::Stopped(session.clone()))
    }

    async fn append_result(
        &self,
        session_id: &str,
        result: StudentResult,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome, QuizError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(AppendOutcome::NotFound);
        };

        if !session.accepts_submissions(now) {
            return Ok(AppendOutcome::Closed);
        }
        if session.has_result_from(&result.student_id) {
            return Ok(AppendOutcome::Duplicate);
        }

        session.results.push(result);
        Ok(AppendOutcome::Appended {
            test_id: session.test_id,
            results_count: session.results.len(),
        })
    }

    async fn list_running(&self) -> Result<Vec<RunningSession>, QuizError> {
        let sessions = self.sessions.lock().await;
        let mut running: Vec<_> = sessions
            .values()
            .filter(|session| session.is_running)
            .cloned()
            .collect();
        running.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(running)
    }

    async fn list_for_lecturer(
        &self,
        lecturer_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<RunningSession>, QuizError> {
        let sessions = self.sessions.lock().await;
        let mut found: Vec<_> = sessions
            .values()
            .filter(|session| session.lecturer_id == lecturer_id && filter.matches(session))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn close_expired(&self, now: DateTime<Utc>) -> Result<Vec<RunningSession>, QuizError> {
        let mut sessions = self.sessions.lock().await;
        let mut closed = Vec::new();
        for session in sessions.values_mut() {
            if session.is_running && session.closes_at <= now {
                session.is_running = false;
                session.stopped_at = Some(now);
                closed.push(session.clone());
            }
        }
        Ok(closed)
    }

    async fn ping(&self) -> Result<(), QuizError> {
        Ok(())
    }
}

/// In-process pending submissions. Expired entries are treated as absent.
#[derive(Clone, Default)]
pub struct MemoryPendingStore {
    entries: Arc<Mutex<HashMap<(String, String), PendingSubmission>>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn pending_key(session_id: &str, student_id: &str) -> (String, String) {
    (session_id.to_string(), student_id.to_string())
}

#[async_trait]
impl PendingRepository for MemoryPendingStore {
    async fn insert(&self, pending: &PendingSubmission) -> Result<bool, QuizError> {
        let mut entries = self.entries.lock().await;
        let key = pending_key(&pending.session_id, &pending.student_id);

        if let Some(existing) = entries.get(&key) {
            if !existing.is_expired(Utc::now()) {
                return Ok(false);
            }
        }

        entries.insert(key, pending.clone());
        Ok(true)
    }

    async fn get(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<PendingSubmission>, QuizError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&pending_key(session_id, student_id))
            .filter(|pending| !pending.is_expired(Utc::now()))
            .cloned())
    }

    async fn take(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<PendingSubmission>, QuizError> {
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(&pending_key(session_id, student_id))
            .filter(|pending| !pending.is_expired(Utc::now())))
    }

    async fn remove(&self, session_id: &str, student_id: &str) -> Result<bool, QuizError> {
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(&pending_key(session_id, student_id))
            .is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, QuizError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, pending| !pending.is_expired(now));
        Ok(before - entries.len())
    }

    async fn ping(&self) -> Result<(), QuizError> {
        Ok(())
    }
}
