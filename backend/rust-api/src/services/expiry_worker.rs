use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    metrics::{EXPIRY_WORKER_TICKS_TOTAL, SESSIONS_TOTAL},
    models::RunningTestsEvent,
    repositories::{PendingRepository, SessionRepository},
    services::{broadcaster::Broadcaster, AppState},
};

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed_sessions: usize,
    pub purged_pending: usize,
}

/// Closes sessions whose submission window elapsed and reclaims stale
/// pending submissions.
pub struct ExpiryWorker {
    sessions: Arc<dyn SessionRepository>,
    pending: Arc<dyn PendingRepository>,
    broadcaster: Broadcaster,
    interval: Duration,
}

impl ExpiryWorker {
    pub fn new(state: &AppState) -> Self {
        Self {
            sessions: state.sessions.clone(),
            pending: state.pending.clone(),
            broadcaster: state.broadcaster.clone(),
            interval: Duration::from_secs(state.config.expiry_sweep_interval_secs.max(1)),
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting expiry worker loop (interval {}s)",
            self.interval.as_secs()
        );

        loop {
            match self.run_once().await {
                Ok(report) => {
                    EXPIRY_WORKER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    debug!(
                        closed_sessions = report.closed_sessions,
                        purged_pending = report.purged_pending,
                        "Expiry worker tick completed"
                    );
                }
                Err(err) => {
                    EXPIRY_WORKER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Expiry worker tick failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        let now = Utc::now();

        let closed = self.sessions.close_expired(now).await?;
        for session in &closed {
            SESSIONS_TOTAL.with_label_values(&["expired"]).inc();
            info!(
                session_id = %session.id,
                test_id = session.test_id,
                results = session.results.len(),
                "Session window elapsed, stopped"
            );
            self.broadcaster.publish(RunningTestsEvent::stopped(
                &session.id,
                session.test_id,
                session.results.len(),
            ));
        }

        let purged_pending = self.pending.purge_expired(now).await?;

        Ok(SweepReport {
            closed_sessions: closed.len(),
            purged_pending,
        })
    }
}
