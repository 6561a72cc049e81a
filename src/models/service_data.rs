//! # Service Data Model
//!
//! `JacsServiceData` is the persisted record of one service instance: which service ran, with
//! which arguments, on whose behalf, where it sits in its lifecycle and what it produced.
//!
//! ## Lifecycle
//!
//! Records are created by a submission in the `created` state and are afterwards mutated only
//! through state transitions (see [`crate::state_machine`]). Arguments never change after
//! creation; a resubmission always creates a new record. The engine never deletes records.
//!
//! ## Parent/Child Links
//!
//! A composite service records the services it fans out to in `child_service_ids`, in
//! submission order. Children point back through `parent_service_id`. Siblings that must run in
//! sequence are linked with `depends_on`.

use crate::constants::system::DEFAULT_OWNER;
use crate::state_machine::JacsServiceState;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier assigned to every service record at creation
pub type ServiceId = Uuid;

/// Execution backend for a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingLocation {
    #[default]
    Local,
    Cluster,
}

impl ProcessingLocation {
    pub const ALL: [ProcessingLocation; 2] = [Self::Local, Self::Cluster];
}

impl fmt::Display for ProcessingLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

impl std::str::FromStr for ProcessingLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cluster" => Ok(Self::Cluster),
            _ => Err(format!("Invalid processing location: {s}")),
        }
    }
}

/// Kind of entry in a service's event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacsServiceEventType {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JacsServiceEventType {
    /// Event recorded when a service enters `state`
    pub fn for_state(state: JacsServiceState) -> Self {
        match state {
            JacsServiceState::Created => Self::Created,
            JacsServiceState::Queued => Self::Queued,
            JacsServiceState::Running => Self::Running,
            JacsServiceState::Success => Self::Completed,
            JacsServiceState::Error => Self::Failed,
            JacsServiceState::Canceled => Self::Canceled,
        }
    }
}

/// One entry of the append-only event log kept on every service record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JacsServiceEvent {
    pub name: JacsServiceEventType,
    pub value: String,
    pub recorded_at: DateTime<Utc>,
}

impl JacsServiceEvent {
    pub fn new(name: JacsServiceEventType, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Persisted record describing one service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JacsServiceData {
    pub id: ServiceId,
    pub name: String,
    pub owner: String,
    pub args: Vec<String>,
    pub state: JacsServiceState,
    pub processing_location: ProcessingLocation,
    pub parent_service_id: Option<ServiceId>,
    pub child_service_ids: Vec<ServiceId>,
    pub depends_on: Vec<ServiceId>,
    pub workspace: Option<String>,
    pub stringified_result: Option<String>,
    pub events: Vec<JacsServiceEvent>,
    pub process_start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JacsServiceData {
    /// Build a fresh record in the `created` state from a submission request
    pub fn from_submission(submission: ServiceSubmission) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: submission.name,
            owner: submission
                .owner
                .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            args: submission.args,
            state: JacsServiceState::Created,
            processing_location: submission.processing_location.unwrap_or_default(),
            parent_service_id: submission.parent_service_id,
            child_service_ids: Vec::new(),
            depends_on: submission.depends_on,
            workspace: submission.workspace,
            stringified_result: None,
            events: vec![JacsServiceEvent::new(
                JacsServiceEventType::Created,
                "Service created",
            )],
            process_start_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_completed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_completed_successfully(&self) -> bool {
        self.state.is_successful()
    }

    pub fn has_completed_unsuccessfully(&self) -> bool {
        self.state.is_unsuccessful()
    }

    /// Link a child service, keeping submission order. Returns false if already linked.
    pub fn add_child(&mut self, child_id: ServiceId) -> bool {
        if self.child_service_ids.contains(&child_id) {
            return false;
        }
        self.child_service_ids.push(child_id);
        true
    }

    pub fn record_event(&mut self, name: JacsServiceEventType, value: impl Into<String>) {
        self.events.push(JacsServiceEvent::new(name, value));
    }

    pub fn last_event(&self) -> Option<&JacsServiceEvent> {
        self.events.last()
    }

    /// Decode the stringified result, if one has been set
    pub fn result<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.stringified_result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }

    /// Folder name unique to this instance, e.g. `fileCopy_<id>`
    pub fn service_folder_name(&self) -> String {
        format!("{}_{}", self.name, self.id)
    }

    /// Working directory for this instance: the record's workspace if set, else the configured
    /// default, else the system temp directory; always suffixed with the service folder.
    pub fn working_directory(&self, default_dir: Option<&str>) -> PathBuf {
        let base = self
            .workspace
            .as_deref()
            .filter(|w| !w.trim().is_empty())
            .or(default_dir.filter(|d| !d.trim().is_empty()))
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        base.join(self.service_folder_name())
    }
}

impl fmt::Display for JacsServiceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.name, self.id, self.state)
    }
}

/// Request to create a new service instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSubmission {
    pub name: String,
    pub owner: Option<String>,
    pub args: Vec<String>,
    pub processing_location: Option<ProcessingLocation>,
    pub parent_service_id: Option<ServiceId>,
    pub depends_on: Vec<ServiceId>,
    pub workspace: Option<String>,
}

impl ServiceSubmission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a flag followed by its value
    pub fn arg(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push(flag.into());
        self.args.push(value.into());
        self
    }

    /// Append a boolean flag only when it is set
    pub fn flag(mut self, flag: impl Into<String>, enabled: bool) -> Self {
        if enabled {
            self.args.push(flag.into());
        }
        self
    }

    pub fn location(mut self, location: ProcessingLocation) -> Self {
        self.processing_location = Some(location);
        self
    }

    pub fn parent(mut self, parent_id: ServiceId) -> Self {
        self.parent_service_id = Some(parent_id);
        self
    }

    pub fn depends_on(mut self, service_id: ServiceId) -> Self {
        if !self.depends_on.contains(&service_id) {
            self.depends_on.push(service_id);
        }
        self
    }

    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }
}
