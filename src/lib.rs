mod auth;
mod core;
mod provider;

#[cfg(test)]
mod tests;

pub use crate::core::domain::error::{ProviderError, ProviderResult, ValidationError};
pub use crate::core::domain::model::{
    ChangeKind, ChangePlan, ContainerSpec, ContainerState, FieldChange,
};
pub use crate::core::infrastructure::retry::RetryConfig;
pub use crate::core::infrastructure::task_poller::PollConfig;
pub use crate::provider::handler::{HandlerRegistry, ResourceHandler};
pub use crate::provider::lxc::{LxcHandler, LxcReconciler, UpdateOutcome};
pub use zxcvbn::Score as PasswordScore;

use crate::{
    core::domain::{
        model::{Credentials, ProxmoxConnection},
        value_object::{
            ApiEndpoint, validate_password, validate_realm, validate_token_id, validate_username,
        },
    },
    core::infrastructure::api_client::ApiClient,
};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Runtime tuning for the provider.
///
/// An explicit configuration object passed at build time; nothing is read
/// from ambient process state.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Node used when a container specification omits `node`.
    pub default_node: Option<String>,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// Age after which a ticket session is refreshed before use.
    ///
    /// The API issues tickets valid for two hours; the default refreshes
    /// after 90 minutes.
    pub ticket_lifetime: Duration,
    /// Minimum strength for ticket passwords, `None` to accept any.
    pub min_password_score: Option<PasswordScore>,
    /// Client-side request rate limit, `None` for unlimited.
    pub rate_limit: Option<RateLimitConfig>,
    /// Poll cadence and limits for awaiting tracked tasks.
    pub poll: PollConfig,
    /// Backoff schedule for transient API failures.
    pub retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_node: None,
            http_timeout: Duration::from_secs(30),
            ticket_lifetime: Duration::from_secs(90 * 60),
            min_password_score: Some(PasswordScore::Three),
            rate_limit: None,
            poll: PollConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = NonZeroU32::new(10).unwrap();
const DEFAULT_BURST_SIZE: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Client-side request rate limit, shared across all concurrent calls.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sustained request rate.
    pub requests_per_second: NonZeroU32,
    /// Requests allowed to burst above the sustained rate.
    pub burst_size: NonZeroU32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst_size: DEFAULT_BURST_SIZE,
        }
    }
}

/// Builder for a configured [`ProxmoxProvider`].
#[derive(Debug, Default)]
pub struct ProviderBuilder {
    endpoint: Option<String>,
    credentials: Option<Credentials>,
    accept_invalid_certs: bool,
    config: ProviderConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl ProviderBuilder {
    /// Sets the cluster endpoint, e.g. `https://pve.example.com:8006`.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Uses username/password credentials with ticket login.
    #[must_use]
    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::Ticket {
            username: username.into(),
            password: password.into(),
            realm: realm.into(),
        });
        self
    }

    /// Uses a pre-provisioned API token (`user@realm!name` plus secret).
    #[must_use]
    pub fn api_token(mut self, token_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::ApiToken {
            token_id: token_id.into(),
            secret: secret.into(),
        });
        self
    }

    /// Accepts self-signed TLS certificates. Off by default.
    #[must_use]
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Node used when a container specification omits `node`.
    #[must_use]
    pub fn default_node(mut self, node: impl Into<String>) -> Self {
        self.config.default_node = Some(node.into());
        self
    }

    /// Replaces the whole runtime configuration.
    ///
    /// Set this before individual knobs such as
    /// [`default_node`](Self::default_node), which write into it.
    #[must_use]
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancellation signal checked while awaiting tracked tasks.
    #[must_use]
    pub fn cancel_signal(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validates the configuration and assembles the provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidSpec` when the endpoint or the
    /// credentials are missing or malformed, and
    /// `ProviderError::Connection` when the HTTP client cannot be built.
    pub fn build(self) -> ProviderResult<ProxmoxProvider> {
        let raw_endpoint = self.endpoint.ok_or_else(|| ValidationError::Field {
            field: "endpoint".to_string(),
            message: "An endpoint URL is required".to_string(),
        })?;
        let endpoint = ApiEndpoint::parse(&raw_endpoint)?;

        let credentials = self.credentials.ok_or_else(|| ValidationError::Field {
            field: "credentials".to_string(),
            message: "Credentials or an API token are required".to_string(),
        })?;
        match &credentials {
            Credentials::Ticket {
                username,
                password,
                realm,
            } => {
                validate_username(username)?;
                validate_realm(realm)?;
                validate_password(password, self.config.min_password_score)?;
            }
            Credentials::ApiToken { token_id, .. } => validate_token_id(token_id)?,
        }

        let connection = ProxmoxConnection::new(endpoint, credentials, self.accept_invalid_certs);
        let client = Arc::new(ApiClient::new(connection, self.config)?);

        let mut lxc = LxcReconciler::new(Arc::clone(&client));
        if let Some(cancel) = self.cancel {
            lxc = lxc.with_cancel(cancel);
        }
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(LxcHandler::new(lxc.clone())));

        Ok(ProxmoxProvider {
            client,
            lxc,
            registry,
        })
    }
}

/// Reconciles Proxmox VE resources against desired-state documents.
///
/// The provider is driven by an orchestration engine through JSON
/// documents: it creates, reads, updates and deletes resources, and
/// classifies pending changes so the engine can plan. It provides:
/// - Ticket and API token authentication with session management
/// - Container lifecycle operations backed by tracked hypervisor tasks
/// - Change classification between desired and recorded state
///
/// # Examples
///
/// ```no_run
/// use pvestate::{ProviderResult, ProxmoxProvider};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> ProviderResult<()> {
///     let provider = ProxmoxProvider::builder()
///         .endpoint("https://pve.example.com:8006")
///         .api_token("automation@pve!provisioner", "12345678-abcd-4321-8765-1234567890ab")
///         .default_node("pve1")
///         .build()?;
///
///     let state = provider
///         .create(
///             "proxmox:lxc",
///             json!({
///                 "vm_id": 210,
///                 "ostemplate": "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst",
///                 "cores": 2,
///                 "memory": 1024,
///                 "disks": { "rootfs": "local-lvm:8" },
///                 "networks": { "net0": "name=eth0,bridge=vmbr0,ip=dhcp" }
///             }),
///         )
///         .await?;
///     println!("{state}");
///     Ok(())
/// }
/// ```
pub struct ProxmoxProvider {
    client: Arc<ApiClient>,
    lxc: LxcReconciler,
    registry: HandlerRegistry,
}

impl ProxmoxProvider {
    /// Creates a new builder for provider configuration.
    #[must_use]
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// Returns the runtime configuration the provider was built with.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        self.client.config()
    }

    /// Typed access to the container reconciler behind the JSON boundary.
    #[must_use]
    pub fn lxc(&self) -> &LxcReconciler {
        &self.lxc
    }

    /// Registers an additional resource handler.
    ///
    /// A handler with the same type name replaces the existing one.
    pub fn register(&mut self, handler: Box<dyn ResourceHandler>) {
        self.registry.register(handler);
    }

    /// Creates the resource described by `spec` and returns its state
    /// document.
    ///
    /// # Errors
    ///
    /// `ProviderError::UnknownResourceType` when no handler is registered
    /// for `type_name`; otherwise whatever the handler surfaces.
    pub async fn create(&self, type_name: &str, spec: Value) -> ProviderResult<Value> {
        self.registry.get(type_name)?.create(spec).await
    }

    /// Refreshes a recorded state document against the cluster.
    ///
    /// `Ok(None)` means the resource no longer exists there.
    pub async fn read(&self, type_name: &str, state: Value) -> ProviderResult<Option<Value>> {
        self.registry.get(type_name)?.read(state).await
    }

    /// Reconciles the resource toward `spec`.
    ///
    /// Returns `{"action": "unchanged" | "updated" | "replaced", "state": ...}`.
    pub async fn update(
        &self,
        type_name: &str,
        spec: Value,
        state: Value,
    ) -> ProviderResult<Value> {
        self.registry.get(type_name)?.update(spec, state).await
    }

    /// Deletes the recorded resource. Succeeds when it is already absent.
    pub async fn delete(&self, type_name: &str, state: Value) -> ProviderResult<()> {
        self.registry.get(type_name)?.delete(state).await
    }

    /// Classifies the changes between `spec` and the recorded `state`
    /// without touching the cluster.
    pub fn diff(&self, type_name: &str, spec: Value, state: Value) -> ProviderResult<Value> {
        self.registry.get(type_name)?.diff(spec, state)
    }
}
