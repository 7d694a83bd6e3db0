use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Started,
    Stopped,
    ResultAdded,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Started => "started",
            SessionAction::Stopped => "stopped",
            SessionAction::ResultAdded => "result_added",
        }
    }
}

/// Hint published on the `running_tests` topic. Clients refetch state through
/// the REST endpoints; the event itself is not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningTestsEvent {
    pub action: SessionAction,
    pub session_id: String,
    pub test_id: i64,
    pub results_count: usize,
}

impl RunningTestsEvent {
    pub fn started(session_id: &str, test_id: i64) -> Self {
        Self {
            action: SessionAction::Started,
            session_id: session_id.to_string(),
            test_id,
            results_count: 0,
        }
    }

    pub fn stopped(session_id: &str, test_id: i64, results_count: usize) -> Self {
        Self {
            action: SessionAction::Stopped,
            session_id: session_id.to_string(),
            test_id,
            results_count,
        }
    }

    pub fn result_added(session_id: &str, test_id: i64, results_count: usize) -> Self {
        Self {
            action: SessionAction::ResultAdded,
            session_id: session_id.to_string(),
            test_id,
            results_count,
        }
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        self.action.as_str()
    }
}
