use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use validator::Validate;

use crate::error::QuizError;
use crate::metrics::{record_rejection, RESULTS_RECORDED_TOTAL};
use crate::models::{
    AnswerKeySnapshot, PendingStatus, PendingSubmission, RawAnswer, RawAnswers,
    RunningTestsEvent, StudentResult, SubmitAnswersRequest,
};
use crate::repositories::{AppendOutcome, PendingRepository, SessionRepository};
use crate::services::broadcaster::Broadcaster;
use crate::services::grader::{grade, SelectedAnswers, Submitter};
use crate::services::AppState;

/// Checks a raw payload against the snapshot and turns it into option-id sets.
///
/// Unknown question ids, unknown option ids and several options for a
/// single-select question are rejected. Repeated ids collapse into one.
pub fn normalize_answers(
    session_id: &str,
    snapshot: &AnswerKeySnapshot,
    raw: &RawAnswers,
) -> Result<SelectedAnswers, QuizError> {
    let malformed = |reason: String| QuizError::MalformedAnswers {
        session_id: session_id.to_string(),
        reason,
    };

    let mut selected = SelectedAnswers::with_capacity(raw.len());
    for (question_id, answer) in raw {
        let question = snapshot
            .question(question_id)
            .ok_or_else(|| malformed(format!("unknown question '{}'", question_id)))?;

        let ids: BTreeSet<u32> = match answer {
            RawAnswer::Single(id) => BTreeSet::from([*id]),
            RawAnswer::Multiple(ids) => ids.iter().copied().collect(),
        };

        if let Some(unknown) = ids.iter().find(|id| !question.has_option(**id)) {
            return Err(malformed(format!(
                "question '{}' has no option {}",
                question_id, unknown
            )));
        }
        if !question.multiselect && ids.len() > 1 {
            return Err(malformed(format!(
                "question '{}' accepts a single option, got {}",
                question_id,
                ids.len()
            )));
        }

        selected.insert(question_id.clone(), ids);
    }

    Ok(selected)
}

/// Student-side attempts: begin, submit, inspect, abandon.
pub struct AnswerService {
    sessions: Arc<dyn SessionRepository>,
    pending: Arc<dyn PendingRepository>,
    broadcaster: Broadcaster,
    pending_slack: Duration,
}

impl AnswerService {
    pub fn new(state: &AppState) -> Self {
        Self {
            sessions: state.sessions.clone(),
            pending: state.pending.clone(),
            broadcaster: state.broadcaster.clone(),
            pending_slack: Duration::seconds(state.config.pending_slack_seconds as i64),
        }
    }

    pub async fn begin(
        &self,
        session_id: &str,
        student_id: &str,
        username: &str,
    ) -> Result<PendingSubmission, QuizError> {
        let now = Utc::now();
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| QuizError::not_found("session", session_id))?;

        if !session.accepts_submissions(now) {
            return Err(self.reject(QuizError::SessionClosed {
                session_id: session_id.to_string(),
            }));
        }
        if session.has_result_from(student_id) {
            return Err(self.reject(QuizError::AlreadySubmitted {
                session_id: session_id.to_string(),
                student_id: student_id.to_string(),
            }));
        }

        let pending = PendingSubmission {
            session_id: session.id.clone(),
            student_id: student_id.to_string(),
            username: username.to_string(),
            test_name: session.test_name.clone(),
            snapshot: session.snapshot,
            started_at: now,
            deadline: session.closes_at,
            expires_at: session.closes_at + self.pending_slack,
        };

        if !self.pending.insert(&pending).await? {
            return Err(self.reject(QuizError::AlreadyActive {
                session_id: session_id.to_string(),
                student_id: student_id.to_string(),
            }));
        }

        tracing::info!(session_id, student_id, deadline = %pending.deadline, "Attempt started");
        Ok(pending)
    }

    /// Decodes a submit body. Any shape or range mismatch is `MalformedAnswers`.
    pub fn parse_submission(
        &self,
        session_id: &str,
        body: serde_json::Value,
    ) -> Result<SubmitAnswersRequest, QuizError> {
        let malformed = |reason: String| QuizError::MalformedAnswers {
            session_id: session_id.to_string(),
            reason,
        };

        let request: SubmitAnswersRequest = serde_json::from_value(body)
            .map_err(|e| self.reject(malformed(e.to_string())))?;
        request
            .validate()
            .map_err(|e| self.reject(malformed(e.to_string())))?;

        Ok(request)
    }

    /// Grades and records an attempt. The pending entry is consumed before the
    /// append, so a rejected append never leaves it behind.
    pub async fn submit(
        &self,
        session_id: &str,
        student_id: &str,
        answers: &RawAnswers,
        elapsed_seconds: u32,
    ) -> Result<StudentResult, QuizError> {
        let no_pending = || QuizError::NoPendingSubmission {
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
        };

        if self.sessions.get(session_id).await?.is_none() {
            return Err(QuizError::not_found("session", session_id));
        }

        let Some(pending) = self.pending.get(session_id, student_id).await? else {
            return Err(self.reject(no_pending()));
        };

        // Payload problems leave the attempt open for a corrected retry.
        let selected = normalize_answers(session_id, &pending.snapshot, answers)
            .map_err(|err| self.reject(err))?;

        let Some(pending) = self.pending.take(session_id, student_id).await? else {
            return Err(self.reject(no_pending()));
        };

        let now = Utc::now();
        let result = grade(
            &pending.snapshot,
            &selected,
            elapsed_seconds,
            Submitter {
                student_id,
                username: &pending.username,
                submitted_at: now,
            },
        );

        match self
            .sessions
            .append_result(session_id, result.clone(), now)
            .await?
        {
            AppendOutcome::Appended {
                test_id,
                results_count,
            } => {
                RESULTS_RECORDED_TOTAL.with_label_values(&["accepted"]).inc();
                tracing::info!(
                    session_id,
                    student_id,
                    right_answers = result.right_answers_count,
                    tasks_num = result.tasks_num,
                    "Result recorded"
                );
                self.broadcaster.publish(RunningTestsEvent::result_added(
                    session_id,
                    test_id,
                    results_count,
                ));
                Ok(result)
            }
            AppendOutcome::Closed => {
                RESULTS_RECORDED_TOTAL.with_label_values(&["closed"]).inc();
                Err(self.reject(QuizError::SessionClosed {
                    session_id: session_id.to_string(),
                }))
            }
            AppendOutcome::Duplicate => {
                RESULTS_RECORDED_TOTAL.with_label_values(&["duplicate"]).inc();
                Err(self.reject(QuizError::AlreadySubmitted {
                    session_id: session_id.to_string(),
                    student_id: student_id.to_string(),
                }))
            }
            AppendOutcome::NotFound => Err(QuizError::not_found("session", session_id)),
        }
    }

    /// Time left on the student's open attempt.
    pub async fn pending(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<PendingStatus, QuizError> {
        self.pending
            .get(session_id, student_id)
            .await?
            .map(|pending| pending.status(Utc::now()))
            .ok_or_else(|| QuizError::NoPendingSubmission {
                session_id: session_id.to_string(),
                student_id: student_id.to_string(),
            })
    }

    /// Drops the open attempt, if any.
    pub async fn abandon(&self, session_id: &str, student_id: &str) -> Result<bool, QuizError> {
        let removed = self.pending.remove(session_id, student_id).await?;
        if removed {
            tracing::info!(session_id, student_id, "Attempt abandoned");
        }
        Ok(removed)
    }

    fn reject(&self, err: QuizError) -> QuizError {
        record_rejection(err.code());
        tracing::warn!(error = %err, "Answer collector rejected request");
        err
    }
}
