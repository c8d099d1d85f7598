//! Tracked hypervisor tasks (UPIDs) and their reported status.

use crate::core::domain::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A handle to one asynchronous hypervisor task.
///
/// Mutating operations answer with a UPID such as
/// `UPID:pve1:0003C4D7:0914BE8C:68A0F4C2:vzcreate:210:root@pam:`; the
/// task must be polled on the node that issued it. Handles live only for
/// the duration of one operation and are never persisted.
#[derive(Debug, Clone)]
pub struct TaskRef {
    upid: String,
    node: String,
    started_at: SystemTime,
}

impl TaskRef {
    pub(crate) fn new(node: &str, upid: String) -> Self {
        Self {
            upid,
            node: node.to_string(),
            started_at: SystemTime::now(),
        }
    }

    /// Returns the full task identifier.
    #[must_use]
    pub fn upid(&self) -> &str {
        &self.upid
    }

    /// Returns the node the task runs on.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Returns when this handle was created.
    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Returns the task type encoded in the identifier (`vzcreate`,
    /// `vzdestroy`, ...), if present.
    #[must_use]
    pub fn task_type(&self) -> Option<&str> {
        self.upid.split(':').nth(5)
    }
}

/// Validates the shape of a task identifier.
pub(crate) fn validate_upid(upid: &str) -> Result<(), ValidationError> {
    let parts: Vec<&str> = upid.split(':').collect();
    if parts.len() < 6 || parts[0] != "UPID" || parts[1].is_empty() {
        return Err(ValidationError::Format(format!(
            "'{upid}' is not a valid task identifier"
        )));
    }
    Ok(())
}

/// Task status from `GET /nodes/{node}/tasks/{upid}/status`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskStatus {
    /// `"running"` while in flight, `"stopped"` once terminal.
    pub status: String,
    /// `"OK"` on success, an error description otherwise. Only present
    /// once the task stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitstatus: Option<String>,
}

impl TaskStatus {
    /// Returns `true` once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == "stopped"
    }

    /// Returns `true` when the task finished successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_finished() && self.exitstatus.as_deref() == Some("OK")
    }

    /// Returns the failure description for a finished, failed task.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        if self.is_finished() && !self.succeeded() {
            Some(self.exitstatus.as_deref().unwrap_or("unknown error"))
        } else {
            None
        }
    }
}
