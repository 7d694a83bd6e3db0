use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::QuizError;
use crate::metrics::SESSIONS_TOTAL;
use crate::models::{
    AnswerKeySnapshot, ListState, Question, RunningRef, RunningSession, RunningTestsEvent,
    SnapshotQuestion, StopResponse, StudentResult, TestDefinition, TestListing,
};
use crate::repositories::{CatalogRepository, SessionFilter, SessionRepository, StopOutcome};
use crate::services::broadcaster::Broadcaster;
use crate::services::AppState;

/// Picks the questions of a new session and freezes their answer key.
///
/// Bank entries failing `Question::validate` are skipped. The sample is uniform
/// without replacement; option order is kept so option ids stay bank positions.
pub fn select_questions<R: Rng + ?Sized>(
    test: &TestDefinition,
    bank: &[Question],
    rng: &mut R,
) -> Result<AnswerKeySnapshot, QuizError> {
    let mut valid: Vec<&Question> = bank
        .iter()
        .filter(|question| match question.validate() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(test_id = test.id, error = %err, "Skipping invalid bank entry");
                false
            }
        })
        .collect();

    let required = test.tasks_num.max(1) as usize;
    if valid.len() < required {
        return Err(QuizError::InsufficientQuestions {
            test_id: test.id,
            available: valid.len(),
            required,
        });
    }

    valid.shuffle(rng);
    valid.truncate(required);

    Ok(AnswerKeySnapshot {
        questions: valid
            .into_iter()
            .map(SnapshotQuestion::from_question)
            .collect(),
    })
}

/// Lecturer-side lifecycle of running sessions.
pub struct SessionService {
    catalog: Arc<dyn CatalogRepository>,
    sessions: Arc<dyn SessionRepository>,
    broadcaster: Broadcaster,
    grace: Duration,
}

impl SessionService {
    pub fn new(state: &AppState) -> Self {
        Self {
            catalog: state.catalog.clone(),
            sessions: state.sessions.clone(),
            broadcaster: state.broadcaster.clone(),
            grace: Duration::seconds(state.config.submission_grace_seconds as i64),
        }
    }

    pub async fn launch(
        &self,
        test_id: i64,
        lecturer_id: &str,
        comment: Option<String>,
    ) -> Result<RunningSession, QuizError> {
        let test = self
            .catalog
            .get_test(test_id)
            .await?
            .ok_or_else(|| QuizError::not_found("test", test_id))?;
        let bank = self.catalog.list_questions(test_id).await?;

        // ThreadRng is !Send, keep it out of any await.
        let snapshot = select_questions(&test, &bank, &mut rand::rng()).inspect_err(|err| {
            tracing::warn!(test_id, lecturer_id, error = %err, "Launch rejected");
        })?;

        let session = RunningSession::new(
            &test,
            lecturer_id,
            comment,
            snapshot,
            Utc::now(),
            self.grace,
        );

        let superseded = self.sessions.launch(session.clone()).await?;
        for prior in &superseded {
            SESSIONS_TOTAL.with_label_values(&["superseded"]).inc();
            tracing::info!(
                session_id = %prior.id,
                test_id,
                "Stopped previous running session on relaunch"
            );
            self.broadcaster.publish(RunningTestsEvent::stopped(
                &prior.id,
                prior.test_id,
                prior.results.len(),
            ));
        }

        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!(
            session_id = %session.id,
            test_id,
            lecturer_id,
            questions = session.snapshot.len(),
            closes_at = %session.closes_at,
            "Test session launched"
        );
        self.broadcaster
            .publish(RunningTestsEvent::started(&session.id, session.test_id));

        Ok(session)
    }

    /// Stops a session of `lecturer_id`. Stopping an already stopped session succeeds.
    pub async fn stop(
        &self,
        session_id: &str,
        lecturer_id: &str,
    ) -> Result<StopResponse, QuizError> {
        match self.sessions.stop(session_id, lecturer_id, Utc::now()).await? {
            StopOutcome::Stopped(session) => {
                SESSIONS_TOTAL.with_label_values(&["stopped"]).inc();
                tracing::info!(
                    session_id,
                    results = session.results.len(),
                    "Test session stopped"
                );
                self.broadcaster.publish(RunningTestsEvent::stopped(
                    &session.id,
                    session.test_id,
                    session.results.len(),
                ));
                Ok(StopResponse {
                    session_id: session_id.to_string(),
                    is_running: false,
                    message: "Session stopped".to_string(),
                })
            }
            StopOutcome::AlreadyStopped => Ok(StopResponse {
                session_id: session_id.to_string(),
                is_running: false,
                message: "Session was already stopped".to_string(),
            }),
            StopOutcome::NotFound => Err(QuizError::not_found("session", session_id)),
        }
    }

    /// Running sessions of a lecturer with results in submission order.
    pub async fn get_running(&self, lecturer_id: &str) -> Result<Vec<RunningSession>, QuizError> {
        self.lecturer_sessions(
            lecturer_id,
            SessionFilter {
                is_running: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn get_finished(&self, lecturer_id: &str) -> Result<Vec<RunningSession>, QuizError> {
        self.lecturer_sessions(
            lecturer_id,
            SessionFilter {
                is_running: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Every launch of `test_id` by the lecturer, newest first.
    pub async fn get_history(
        &self,
        test_id: i64,
        lecturer_id: &str,
    ) -> Result<Vec<RunningSession>, QuizError> {
        self.lecturer_sessions(
            lecturer_id,
            SessionFilter {
                test_id: Some(test_id),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn latest_results(
        &self,
        test_id: i64,
        lecturer_id: &str,
    ) -> Result<Vec<StudentResult>, QuizError> {
        let history = self.get_history(test_id, lecturer_id).await?;
        Ok(history
            .first()
            .map(RunningSession::sorted_results)
            .unwrap_or_default())
    }

    pub async fn get_results(
        &self,
        session_id: &str,
        lecturer_id: &str,
    ) -> Result<RunningSession, QuizError> {
        self.sessions
            .get(session_id)
            .await?
            .filter(|session| session.lecturer_id == lecturer_id)
            .map(|mut session| {
                session.results = session.sorted_results();
                session
            })
            .ok_or_else(|| QuizError::not_found("session", session_id))
    }

    /// Tests of the catalog with their running state.
    pub async fn list_tests(&self, state: ListState) -> Result<Vec<TestListing>, QuizError> {
        let tests = self.catalog.list_tests().await?;

        let mut running: HashMap<i64, Vec<RunningRef>> = HashMap::new();
        for session in self.sessions.list_running().await? {
            running.entry(session.test_id).or_default().push(RunningRef {
                session_id: session.id,
                lecturer_id: session.lecturer_id,
                closes_at: session.closes_at,
            });
        }

        let mut listings = Vec::with_capacity(tests.len());
        for test in tests {
            let running_sessions = running.remove(&test.id).unwrap_or_default();
            let is_running = !running_sessions.is_empty();
            let keep = match state {
                ListState::Running => is_running,
                ListState::NotRunning => !is_running,
                ListState::All => true,
            };
            if !keep {
                continue;
            }

            let questions_num = self.catalog.count_questions(test.id).await?;
            listings.push(TestListing {
                test,
                questions_num,
                is_running,
                running_sessions,
            });
        }

        Ok(listings)
    }

    async fn lecturer_sessions(
        &self,
        lecturer_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<RunningSession>, QuizError> {
        let mut sessions = self.sessions.list_for_lecturer(lecturer_id, filter).await?;
        for session in &mut sessions {
            session.results = session.sorted_results();
        }
        Ok(sessions)
    }
}
