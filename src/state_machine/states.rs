use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a persisted service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacsServiceState {
    /// Record persisted, not yet handed to the dispatcher
    Created,
    /// Waiting in the dispatch queue for its dependencies and an execution slot
    Queued,
    /// Processor pipeline is executing
    Running,
    /// Completed successfully; the stringified result is set
    Success,
    /// Failed with an error
    Error,
    /// Aborted deliberately, either by request or because a child was canceled
    Canceled,
}

impl JacsServiceState {
    pub const ALL: [JacsServiceState; 6] = [
        Self::Created,
        Self::Queued,
        Self::Running,
        Self::Success,
        Self::Error,
        Self::Canceled,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Canceled)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Terminal but not successful
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, Self::Error | Self::Canceled)
    }

    /// Check if this is an active state (service is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Position in the lifecycle; terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Queued => 1,
            Self::Running => 2,
            Self::Success | Self::Error | Self::Canceled => 3,
        }
    }
}

impl fmt::Display for JacsServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for JacsServiceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid service state: {s}")),
        }
    }
}

/// Default state for new service records
impl Default for JacsServiceState {
    fn default() -> Self {
        Self::Created
    }
}
