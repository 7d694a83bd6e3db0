use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;

use super::PendingRepository;
use crate::error::QuizError;
use crate::metrics::track_cache_operation;
use crate::models::PendingSubmission;

/// Pending submissions as JSON values under `pending:{session}:{student}`.
/// Expiry is delegated to the key TTL, so abandoned attempts reclaim themselves.
#[derive(Clone)]
pub struct RedisPendingStore {
    redis: ConnectionManager,
}

impl RedisPendingStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

fn ttl_seconds(pending: &PendingSubmission, now: DateTime<Utc>) -> i64 {
    (pending.expires_at - now).num_seconds().max(1)
}

fn decode(json: Option<String>) -> Result<Option<PendingSubmission>, QuizError> {
    json.map(|value| serde_json::from_str::<PendingSubmission>(&value))
        .transpose()
        .map_err(QuizError::from)
}

#[async_trait]
impl PendingRepository for RedisPendingStore {
    async fn insert(&self, pending: &PendingSubmission) -> Result<bool, QuizError> {
        let mut conn = self.redis.clone();
        let key = PendingSubmission::key(&pending.session_id, &pending.student_id);
        let json = serde_json::to_string(pending)?;
        let ttl = ttl_seconds(pending, Utc::now());

        // SET NX answers nil when the key is already present.
        let reply: Option<String> = track_cache_operation(
            "set_nx",
            redis::cmd("SET")
                .arg(&key)
                .arg(json)
                .arg("NX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut conn),
        )
        .await?;

        Ok(reply.is_some())
    }

    async fn get(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<PendingSubmission>, QuizError> {
        let mut conn = self.redis.clone();
        let key = PendingSubmission::key(session_id, student_id);

        let json: Option<String> =
            track_cache_operation("get", redis::cmd("GET").arg(&key).query_async(&mut conn))
                .await?;
        decode(json)
    }

    async fn take(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<PendingSubmission>, QuizError> {
        let mut conn = self.redis.clone();
        let key = PendingSubmission::key(session_id, student_id);

        let json: Option<String> =
            track_cache_operation("getdel", redis::cmd("GETDEL").arg(&key).query_async(&mut conn))
                .await?;

        decode(json)
    }

    async fn remove(&self, session_id: &str, student_id: &str) -> Result<bool, QuizError> {
        let mut conn = self.redis.clone();
        let key = PendingSubmission::key(session_id, student_id);

        let removed: i64 =
            track_cache_operation("del", redis::cmd("DEL").arg(&key).query_async(&mut conn))
                .await?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, QuizError> {
        // Keys carry their own TTL.
        Ok(0)
    }

    async fn ping(&self) -> Result<(), QuizError> {
        let mut conn = self.redis.clone();
        track_cache_operation("ping", redis::cmd("PING").query_async::<String>(&mut conn))
            .await?;
        Ok(())
    }
}
