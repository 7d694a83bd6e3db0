use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::options::{
    FindOneAndUpdateOptions, IndexOptions, ReplaceOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::{AppendOutcome, CatalogRepository, SessionFilter, SessionRepository, StopOutcome};
use crate::error::QuizError;
use crate::metrics::track_db_operation;
use crate::models::{
    AnswerKeySnapshot, Question, QuestionOption, RunningSession, StudentResult, TestDefinition,
};
use crate::utils::time::chrono_to_bson;

const TESTS: &str = "tests";
const QUESTIONS: &str = "questions";
const SESSIONS: &str = "running_sessions";
const ONE_RUNNING_INDEX: &str = "one_running_per_test_and_lecturer";
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestDocument {
    #[serde(rename = "_id")]
    id: i64,
    name: String,
    #[serde(default)]
    description: String,
    subject_id: i64,
    #[serde(default)]
    subject_name: String,
    author_id: String,
    tasks_num: u32,
    duration_seconds: u32,
}

impl From<TestDocument> for TestDefinition {
    fn from(doc: TestDocument) -> Self {
        TestDefinition {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            subject_id: doc.subject_id,
            subject_name: doc.subject_name,
            author_id: doc.author_id,
            tasks_num: doc.tasks_num,
            duration_seconds: doc.duration_seconds,
        }
    }
}

impl From<TestDefinition> for TestDocument {
    fn from(test: TestDefinition) -> Self {
        TestDocument {
            id: test.id,
            name: test.name,
            description: test.description,
            subject_id: test.subject_id,
            subject_name: test.subject_name,
            author_id: test.author_id,
            tasks_num: test.tasks_num,
            duration_seconds: test.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuestionDocument {
    #[serde(rename = "_id")]
    id: String,
    test_id: i64,
    formulation: String,
    #[serde(default)]
    multiselect: bool,
    options: Vec<QuestionOption>,
}

impl From<QuestionDocument> for Question {
    fn from(doc: QuestionDocument) -> Self {
        Question {
            id: doc.id,
            test_id: doc.test_id,
            formulation: doc.formulation,
            multiselect: doc.multiselect,
            options: doc.options,
        }
    }
}

impl From<Question> for QuestionDocument {
    fn from(question: Question) -> Self {
        QuestionDocument {
            id: question.id,
            test_id: question.test_id,
            formulation: question.formulation,
            multiselect: question.multiselect,
            options: question.options,
        }
    }
}

/// Catalog backed by the `tests` and `questions` collections.
#[derive(Clone)]
pub struct MongoCatalog {
    mongo: Database,
}

impl MongoCatalog {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn tests(&self) -> Collection<TestDocument> {
        self.mongo.collection(TESTS)
    }

    fn questions(&self) -> Collection<QuestionDocument> {
        self.mongo.collection(QUESTIONS)
    }
}

#[async_trait]
impl CatalogRepository for MongoCatalog {
    async fn get_test(&self, test_id: i64) -> Result<Option<TestDefinition>, QuizError> {
        let test = track_db_operation(
            "find_one",
            TESTS,
            self.tests().find_one(doc! { "_id": test_id }),
        )
        .await?;
        Ok(test.map(TestDefinition::from))
    }

    async fn list_tests(&self) -> Result<Vec<TestDefinition>, QuizError> {
        let tests: Vec<TestDocument> = track_db_operation("find", TESTS, async {
            let cursor = self.tests().find(doc! {}).sort(doc! { "_id": 1 }).await?;
            cursor.try_collect().await
        })
        .await?;
        Ok(tests.into_iter().map(TestDefinition::from).collect())
    }

    async fn list_questions(&self, test_id: i64) -> Result<Vec<Question>, QuizError> {
        let questions: Vec<QuestionDocument> = track_db_operation("find", QUESTIONS, async {
            let cursor = self.questions().find(doc! { "test_id": test_id }).await?;
            cursor.try_collect().await
        })
        .await?;
        Ok(questions.into_iter().map(Question::from).collect())
    }

    async fn count_questions(&self, test_id: i64) -> Result<u64, QuizError> {
        Ok(track_db_operation(
            "count_documents",
            QUESTIONS,
            self.questions().count_documents(doc! { "test_id": test_id }),
        )
        .await?)
    }

    async fn save_test(&self, test: TestDefinition) -> Result<(), QuizError> {
        let test_id = test.id;
        track_db_operation(
            "replace_one",
            TESTS,
            self.tests()
                .replace_one(doc! { "_id": test_id }, TestDocument::from(test))
                .with_options(ReplaceOptions::builder().upsert(true).build()),
        )
        .await?;
        Ok(())
    }

    async fn save_question(&self, question: Question) -> Result<(), QuizError> {
        question.validate()?;
        let question_id = question.id.clone();
        track_db_operation(
            "replace_one",
            QUESTIONS,
            self.questions()
                .replace_one(doc! { "_id": &question_id }, QuestionDocument::from(question))
                .with_options(ReplaceOptions::builder().upsert(true).build()),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QuizError> {
        track_db_operation("ping", TESTS, self.mongo.run_command(doc! { "ping": 1 })).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    test_id: i64,
    test_name: String,
    subject_id: i64,
    lecturer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    is_running: bool,
    #[serde(with = "crate::utils::time::bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
    #[serde(with = "crate::utils::time::bson_datetime_as_chrono")]
    closes_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::utils::time::bson_datetime_as_chrono_option"
    )]
    stopped_at: Option<DateTime<Utc>>,
    snapshot: AnswerKeySnapshot,
    #[serde(default)]
    results: Vec<StudentResult>,
}

impl From<SessionDocument> for RunningSession {
    fn from(doc: SessionDocument) -> Self {
        RunningSession {
            id: doc.id,
            test_id: doc.test_id,
            test_name: doc.test_name,
            subject_id: doc.subject_id,
            lecturer_id: doc.lecturer_id,
            comment: doc.comment,
            is_running: doc.is_running,
            created_at: doc.created_at,
            closes_at: doc.closes_at,
            stopped_at: doc.stopped_at,
            snapshot: doc.snapshot,
            results: doc.results,
        }
    }
}

impl From<RunningSession> for SessionDocument {
    fn from(session: RunningSession) -> Self {
        SessionDocument {
            id: session.id,
            test_id: session.test_id,
            test_name: session.test_name,
            subject_id: session.subject_id,
            lecturer_id: session.lecturer_id,
            comment: session.comment,
            is_running: session.is_running,
            created_at: session.created_at,
            closes_at: session.closes_at,
            stopped_at: session.stopped_at,
            snapshot: session.snapshot,
            results: session.results,
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == DUPLICATE_KEY
    )
}

/// Running sessions in the `running_sessions` collection. Every state change is a
/// single conditional document update.
#[derive(Clone)]
pub struct MongoSessionStore {
    mongo: Database,
}

impl MongoSessionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<SessionDocument> {
        self.mongo.collection(SESSIONS)
    }

    /// Creates the indexes the store relies on. Safe to call on every start.
    pub async fn ensure_indexes(&self) -> Result<(), QuizError> {
        let one_running = IndexModel::builder()
            .keys(doc! { "test_id": 1, "lecturer_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(ONE_RUNNING_INDEX.to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "is_running": true })
                    .build(),
            )
            .build();
        let by_lecturer = IndexModel::builder()
            .keys(doc! { "lecturer_id": 1, "created_at": -1 })
            .build();

        track_db_operation(
            "create_indexes",
            SESSIONS,
            self.collection().create_indexes([one_running, by_lecturer]),
        )
        .await?;
        tracing::info!("Indexes ensured on '{}'", SESSIONS);
        Ok(())
    }

    async fn stop_running_for(
        &self,
        test_id: i64,
        lecturer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<RunningSession>, QuizError> {
        let mut stopped = Vec::new();
        // The partial unique index keeps this to at most one document.
        while let Some(previous) = track_db_operation(
            "find_one_and_update",
            SESSIONS,
            self.collection()
                .find_one_and_update(
                    doc! { "test_id": test_id, "lecturer_id": lecturer_id, "is_running": true },
                    doc! { "$set": { "is_running": false, "stopped_at": chrono_to_bson(at) } },
                )
                .with_options(return_after()),
        )
        .await?
        {
            stopped.push(RunningSession::from(previous));
        }
        Ok(stopped)
    }

    /// Puts sessions stopped by a launch that then failed back into the running state.
    async fn restore_running(&self, superseded: &[RunningSession]) {
        let Some((filter, update)) = restore_running_update(superseded) else {
            return;
        };
        let restored =
            track_db_operation("update_many", SESSIONS, self.collection().update_many(filter, update))
                .await;
        match restored {
            Ok(outcome) => tracing::warn!(
                restored = outcome.modified_count,
                "Launch failed, superseded sessions restored"
            ),
            Err(err) => tracing::error!(
                error = %err,
                "Launch failed and superseded sessions could not be restored"
            ),
        }
    }

    /// Newest first.
    async fn find_sessions(&self, filter: Document) -> Result<Vec<RunningSession>, QuizError> {
        let sessions: Vec<SessionDocument> = track_db_operation("find", SESSIONS, async {
            let cursor = self
                .collection()
                .find(filter)
                .sort(doc! { "created_at": -1 })
                .await?;
            cursor.try_collect().await
        })
        .await?;
        Ok(sessions.into_iter().map(RunningSession::from).collect())
    }

    async fn insert_session(&self, document: &SessionDocument) -> Result<(), mongodb::error::Error> {
        track_db_operation("insert_one", SESSIONS, self.collection().insert_one(document)).await?;
        Ok(())
    }
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

/// Filter and update reverting a supersede. Only documents still stopped are
/// touched; the unique index rejects the restore if another session took the slot.
fn restore_running_update(superseded: &[RunningSession]) -> Option<(Document, Document)> {
    if superseded.is_empty() {
        return None;
    }
    let ids: Vec<&str> = superseded.iter().map(|session| session.id.as_str()).collect();
    Some((
        doc! { "_id": { "$in": ids }, "is_running": false },
        doc! { "$set": { "is_running": true }, "$unset": { "stopped_at": "" } },
    ))
}

#[async_trait]
impl SessionRepository for MongoSessionStore {
    async fn launch(&self, session: RunningSession) -> Result<Vec<RunningSession>, QuizError> {
        let test_id = session.test_id;
        let lecturer_id = session.lecturer_id.clone();
        let created_at = session.created_at;
        let document = SessionDocument::from(session);

        let mut superseded = self
            .stop_running_for(test_id, &lecturer_id, created_at)
            .await?;

        let inserted = match self.insert_session(&document).await {
            Err(err) if is_duplicate_key(&err) => {
                // A concurrent launch won the index slot between our stop and insert.
                tracing::warn!(
                    "Concurrent launch detected for test={} lecturer={}, retrying",
                    test_id,
                    lecturer_id
                );
                match self.stop_running_for(test_id, &lecturer_id, created_at).await {
                    Ok(more) => {
                        superseded.extend(more);
                        self.insert_session(&document).await.map_err(QuizError::from)
                    }
                    Err(err) => Err(err),
                }
            }
            other => other.map_err(QuizError::from),
        };

        match inserted {
            Ok(()) => Ok(superseded),
            Err(err) => {
                self.restore_running(&superseded).await;
                Err(err)
            }
        }
    }

    async fn get(&self, session_id: &str) -> Result<Option<RunningSession>, QuizError> {
        let session = track_db_operation(
            "find_one",
            SESSIONS,
            self.collection().find_one(doc! { "_id": session_id }),
        )
        .await?;
        Ok(session.map(RunningSession::from))
    }

    async fn stop(
        &self,
        session_id: &str,
        lecturer_id: &str,
        at: DateTime<Utc>,
    ) -> Result<StopOutcome, QuizError> {
        let stopped = track_db_operation(
            "find_one_and_update",
            SESSIONS,
            self.collection()
                .find_one_and_update(
                    doc! { "_id": session_id, "lecturer_id": lecturer_id, "is_running": true },
                    doc! { "$set": { "is_running": false, "stopped_at": chrono_to_bson(at) } },
                )
                .with_options(return_after()),
        )
        .await?;

        if let Some(session) = stopped {
            return Ok(StopOutcome::Stopped(session.into()));
        }

        let owned = track_db_operation(
            "count_documents",
            SESSIONS,
            self.collection()
                .count_documents(doc! { "_id": session_id, "lecturer_id": lecturer_id }),
        )
        .await?;
        Ok(if owned > 0 {
            StopOutcome::AlreadyStopped
        } else {
            StopOutcome::NotFound
        })
    }

    async fn append_result(
        &self,
        session_id: &str,
        result: StudentResult,
        now: DateTime<Utc>,
    ) -> Result<AppendOutcome, QuizError> {
        let student_id = result.student_id.clone();
        let result_bson = bson::to_bson(&result)?;

        let updated = track_db_operation(
            "append_result",
            SESSIONS,
            self.collection()
                .find_one_and_update(
                    doc! {
                        "_id": session_id,
                        "is_running": true,
                        "closes_at": { "$gt": chrono_to_bson(now) },
                        "results.student_id": { "$ne": &student_id },
                    },
                    doc! { "$push": { "results": result_bson } },
                )
                .with_options(return_after()),
        )
        .await?;

        if let Some(session) = updated {
            return Ok(AppendOutcome::Appended {
                test_id: session.test_id,
                results_count: session.results.len(),
            });
        }

        // The conditional update matched nothing; find out which condition failed.
        let Some(session) = self.get(session_id).await? else {
            return Ok(AppendOutcome::NotFound);
        };
        Ok(if session.has_result_from(&student_id) {
            AppendOutcome::Duplicate
        } else {
            AppendOutcome::Closed
        })
    }

    async fn list_running(&self) -> Result<Vec<RunningSession>, QuizError> {
        self.find_sessions(doc! { "is_running": true }).await
    }

    async fn list_for_lecturer(
        &self,
        lecturer_id: &str,
        filter: SessionFilter,
    ) -> Result<Vec<RunningSession>, QuizError> {
        let mut query = Document::new();
        query.insert("lecturer_id", lecturer_id);
        if let Some(test_id) = filter.test_id {
            query.insert("test_id", test_id);
        }
        if let Some(is_running) = filter.is_running {
            query.insert("is_running", is_running);
        }
        self.find_sessions(query).await
    }

    async fn close_expired(&self, now: DateTime<Utc>) -> Result<Vec<RunningSession>, QuizError> {
        let expired = self
            .find_sessions(doc! { "is_running": true, "closes_at": { "$lte": chrono_to_bson(now) } })
            .await?;

        let mut closed = Vec::with_capacity(expired.len());
        for session in expired {
            // A concurrent stop may have won; only report sessions we flipped.
            let flipped = track_db_operation(
                "find_one_and_update",
                SESSIONS,
                self.collection()
                    .find_one_and_update(
                        doc! { "_id": &session.id, "is_running": true },
                        doc! { "$set": { "is_running": false, "stopped_at": chrono_to_bson(now) } },
                    )
                    .with_options(return_after()),
            )
            .await?;
            if let Some(session) = flipped {
                closed.push(RunningSession::from(session));
            }
        }
        Ok(closed)
    }

    async fn ping(&self) -> Result<(), QuizError> {
        track_db_operation("ping", SESSIONS, self.mongo.run_command(doc! { "ping": 1 })).await?;
        Ok(())
    }
}
