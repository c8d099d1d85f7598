use thiserror::Error;

use crate::core::domain::model::state::ContainerState;

/// The main error type for provider operations.
///
/// This enum represents all possible errors that can occur while
/// reconciling container resources: specification validation, remote API
/// failures, task tracking and partially applied updates. The orchestration
/// engine drives retry and recovery decisions off these variants, so each
/// one keeps enough context to act on.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The desired specification failed local validation.
    ///
    /// Raised before any remote call is made; the cluster state is untouched.
    #[error("Invalid specification: {0}")]
    InvalidSpec(#[from] ValidationError),

    /// The API rejected the current credentials.
    ///
    /// Fatal for the running operation; retrying with the same credentials
    /// cannot succeed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The referenced object does not exist on the cluster.
    ///
    /// During Read this signals drift, during Delete it means the work is
    /// already done. Only Create and Update treat it as a failure.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The container is locked by a concurrent operation.
    ///
    /// Transient; the hypervisor serializes operations per container and
    /// releases the lock when the running task finishes.
    #[error("Resource busy: {0}")]
    Conflict(String),

    /// The API answered with an error status.
    ///
    /// Server-side errors (5xx) are transient, request errors (4xx) are
    /// permanent and surface immediately.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A tracked task did not reach a terminal state within the deadline.
    ///
    /// The task may still complete on the hypervisor afterwards; a later
    /// Read reflects whatever it produced.
    #[error("Task {upid} did not reach a terminal state within {}s", .deadline.as_secs())]
    Timeout {
        upid: String,
        deadline: std::time::Duration,
    },

    /// The hypervisor reported a terminal failure for a tracked task.
    #[error("Task {upid} failed: {reason}")]
    TaskFailed { upid: String, reason: String },

    /// An update applied some changes before failing.
    ///
    /// `state` carries the container configuration re-read after the
    /// failure, so the engine records what was actually applied instead of
    /// a stale or empty document.
    #[error("Update partially applied: {source}")]
    PartialUpdate {
        state: Box<ContainerState>,
        #[source]
        source: Box<ProviderError>,
    },

    /// The operation was cancelled while awaiting a task.
    ///
    /// The task was drained to a terminal state first, so no tracked
    /// operation is left running behind the engine's back.
    #[error("Cancelled while awaiting task {upid}")]
    Cancelled { upid: String },

    /// No handler is registered for the requested resource type.
    #[error("Unknown resource type '{0}'")]
    UnknownResourceType(String),

    /// A state document could not be decoded.
    #[error("State document error: {0}")]
    Document(String),
}

impl ProviderError {
    /// Returns `true` for failures worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict(_) | Self::Connection(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Specialized error type for validation failures.
///
/// This enum provides detailed context about why a validation
/// failed, including field-specific errors and format violations.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Represents a validation failure for a specific field
    ///
    /// # Fields
    /// * `field` - The name of the field that failed validation
    /// * `message` - A detailed message about why validation failed
    #[error("Field '{field}' validation failed: {message}")]
    Field { field: String, message: String },

    /// Represents format/syntax validation failures
    ///
    /// # Fields
    /// * `0` - Description of the format violation
    #[error("Format error: {0}")]
    Format(String),

    /// Represents violations of domain constraints
    ///
    /// # Fields
    /// * `0` - Description of the constraint violation
    #[error("Domain constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Type alias for Results that may fail with a ProviderError
pub type ProviderResult<T> = Result<T, ProviderError>;
