use serde::{Deserialize, Serialize};

/// Events that can trigger service state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServiceEvent {
    /// Hand the service to the dispatch queue
    Enqueue,
    /// Begin executing the processor pipeline
    Start,
    /// Mark the service successful with its stringified result
    Complete(String),
    /// Mark the service failed with an error message
    Fail(String),
    /// Abort the service with a reason
    Cancel(String),
}

impl ServiceEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Start => "start",
            Self::Complete(_) => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel(_) => "cancel",
        }
    }

    /// Extract the stringified result if this is a completion event
    pub fn result(&self) -> Option<&str> {
        match self {
            Self::Complete(result) => Some(result),
            _ => None,
        }
    }

    /// Human readable description recorded in the service event log
    pub fn description(&self) -> String {
        match self {
            Self::Enqueue => "Queued for dispatch".to_string(),
            Self::Start => "Processing started".to_string(),
            Self::Complete(_) => "Completed successfully".to_string(),
            Self::Fail(reason) => format!("Failed: {reason}"),
            Self::Cancel(reason) => format!("Canceled: {reason}"),
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Fail(_) | Self::Cancel(_))
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }

    pub fn cancel_with_reason(reason: impl Into<String>) -> Self {
        Self::Cancel(reason.into())
    }
}
