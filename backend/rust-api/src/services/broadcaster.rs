use tokio::sync::broadcast::{self, error::RecvError};

use crate::metrics::STREAM_SUBSCRIBERS_ACTIVE;
use crate::models::RunningTestsEvent;

pub const RUNNING_TESTS_TOPIC: &str = "running_tests";

/// Fan-out of session lifecycle hints on the `running_tests` topic.
///
/// Publishing never waits on subscribers: a slow subscriber that falls more
/// than `capacity` events behind skips the missed ones instead of stalling
/// the publisher. Events are hints only, so a skipped one costs a refetch.
#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<RunningTestsEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: RunningTestsEvent) -> usize {
        tracing::debug!(
            topic = RUNNING_TESTS_TOPIC,
            action = event.action.as_str(),
            session_id = %event.session_id,
            "Publishing event"
        );
        // No receivers is not an error for a hint channel.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        STREAM_SUBSCRIBERS_ACTIVE.inc();
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end held by one client connection. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<RunningTestsEvent>,
}

impl Subscription {
    /// Next event in publish order, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<RunningTestsEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Subscriber lagged behind running_tests topic");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        STREAM_SUBSCRIBERS_ACTIVE.dec();
    }
}
