//! Boundary the orchestration engine drives the provider through.
//!
//! Payloads cross this boundary as JSON documents; each handler decodes
//! its own specification and state shapes, so the engine stays agnostic
//! of resource kinds.

use crate::core::domain::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// One resource kind's CRUD implementation.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// The type name this handler serves (`"proxmox:lxc"`).
    fn type_name(&self) -> &'static str;

    /// Creates the resource described by `spec` and returns the recorded
    /// state document.
    async fn create(&self, spec: Value) -> ProviderResult<Value>;

    /// Refreshes the recorded state document against the cluster.
    ///
    /// Returns `Ok(None)` when the resource no longer exists; the engine
    /// treats that as drift, not as a failure.
    async fn read(&self, state: Value) -> ProviderResult<Option<Value>>;

    /// Reconciles the resource toward `spec`.
    ///
    /// Returns `{"action": "unchanged" | "updated" | "replaced",
    /// "state": <document>}` so the engine can tell a no-op and a
    /// replacement apart from an in-place update.
    async fn update(&self, spec: Value, state: Value) -> ProviderResult<Value>;

    /// Deletes the resource. Succeeds when it is already gone.
    async fn delete(&self, state: Value) -> ProviderResult<()>;

    /// Computes the change plan between `spec` and the recorded state.
    /// Pure: no remote calls.
    fn diff(&self, spec: Value, state: Value) -> ProviderResult<Value>;
}

impl std::fmt::Debug for dyn ResourceHandler + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandler")
            .field("type_name", &self.type_name())
            .finish_non_exhaustive()
    }
}

/// Dispatch table from resource type names to their handlers.
///
/// New resource kinds implement `ResourceHandler` and register here; the
/// reconciliation discipline stays inside each handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Box<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under its own type name. A later registration
    /// for the same name replaces the earlier one.
    pub fn register(&mut self, handler: Box<dyn ResourceHandler>) {
        self.handlers.insert(handler.type_name(), handler);
    }

    /// Looks up the handler for a type name.
    ///
    /// # Errors
    /// Returns `ProviderError::UnknownResourceType` for names nothing was
    /// registered under.
    pub fn get(&self, type_name: &str) -> ProviderResult<&dyn ResourceHandler> {
        self.handlers
            .get(type_name)
            .map(AsRef::as_ref)
            .ok_or_else(|| ProviderError::UnknownResourceType(type_name.to_string()))
    }
}
