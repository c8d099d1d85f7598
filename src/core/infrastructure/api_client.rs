//! Internal HTTP client for the Proxmox VE REST API.
//!
//! Handles both authentication modes, maps HTTP failures onto the
//! provider error taxonomy and exposes the typed container operations
//! the reconciler is built on.

use crate::{
    ProviderConfig,
    auth::application::service::login_service::LoginService,
    core::domain::{
        error::{ProviderError, ProviderResult},
        model::{
            AuthSession, ProxmoxConnection, TaskRef, TaskStatus,
            container::{CreateParams, LxcConfig, LxcStatus, UpdateParams},
            task::validate_upid,
        },
    },
};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Envelope every `/api2/json` response comes wrapped in.
#[derive(Debug, Deserialize)]
struct PveResponse<T> {
    data: Option<T>,
}

/// Outcome of a configuration PUT.
///
/// Small changes apply synchronously and come back with a null body;
/// anything that needs hypervisor work returns a tracked task instead.
#[derive(Debug)]
pub enum ConfigApply {
    Applied,
    Task(TaskRef),
}

/// HTTP client that manages authentication and calls the Proxmox API.
///
/// Ticket sessions are established lazily and refreshed once when a
/// request comes back `401 Unauthorized`. API token credentials skip the
/// session machinery entirely and ride along as an `Authorization`
/// header on every request.
pub struct ApiClient {
    http_client: Client,
    connection: Arc<ProxmoxConnection>,
    session: Arc<RwLock<Option<AuthSession>>>,
    config: Arc<ProviderConfig>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl ApiClient {
    /// Creates a new `ApiClient`. The client starts unauthenticated.
    ///
    /// # Errors
    /// Returns `ProviderError::Connection` if the HTTP client cannot be built.
    pub fn new(connection: ProxmoxConnection, config: ProviderConfig) -> ProviderResult<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(connection.accepts_invalid_certs())
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        let rate_limiter = config.rate_limit.map(|rl| {
            let quota = Quota::per_second(rl.requests_per_second).allow_burst(rl.burst_size);
            Arc::new(DefaultDirectRateLimiter::direct(quota))
        });

        Ok(Self {
            http_client,
            connection: Arc::new(connection),
            session: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
            rate_limiter,
        })
    }

    /// Returns the provider configuration this client was built with.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Stores a session, replacing any previous one.
    pub(crate) async fn set_session(&self, session: AuthSession) {
        let mut lock = self.session.write().await;
        *lock = Some(session);
    }

    /// Returns a snapshot of the current session, if any.
    #[cfg(test)]
    pub(crate) async fn session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    // -- Typed container operations ------------------------------------

    /// Creates a container and returns the tracked creation task.
    pub(crate) async fn create_container(
        &self,
        node: &str,
        params: &CreateParams,
    ) -> ProviderResult<TaskRef> {
        let response: PveResponse<String> =
            self.post(&format!("nodes/{node}/lxc"), params).await?;
        task_from_response(node, response.data)
    }

    /// Fetches the container configuration.
    pub(crate) async fn fetch_config(&self, node: &str, vm_id: u32) -> ProviderResult<LxcConfig> {
        let response: PveResponse<LxcConfig> = self
            .get(&format!("nodes/{node}/lxc/{vm_id}/config"))
            .await?;
        response.data.ok_or_else(|| {
            ProviderError::NotFound(format!("No configuration for container {vm_id} on {node}"))
        })
    }

    /// Fetches the current runtime status.
    pub(crate) async fn fetch_status(&self, node: &str, vm_id: u32) -> ProviderResult<LxcStatus> {
        let response: PveResponse<LxcStatus> = self
            .get(&format!("nodes/{node}/lxc/{vm_id}/status/current"))
            .await?;
        response.data.ok_or_else(|| {
            ProviderError::NotFound(format!("No status for container {vm_id} on {node}"))
        })
    }

    /// Applies configuration changes to an existing container.
    pub(crate) async fn update_config(
        &self,
        node: &str,
        vm_id: u32,
        params: &UpdateParams,
    ) -> ProviderResult<ConfigApply> {
        let response: PveResponse<String> = self
            .put(&format!("nodes/{node}/lxc/{vm_id}/config"), params)
            .await?;
        config_apply_from_response(node, response.data)
    }

    /// Grows a mounted disk to the given size (`"16G"`, `"1536M"`).
    pub(crate) async fn resize_disk(
        &self,
        node: &str,
        vm_id: u32,
        disk: &str,
        size: &str,
    ) -> ProviderResult<ConfigApply> {
        let body = serde_json::json!({ "disk": disk, "size": size });
        let response: PveResponse<String> = self
            .put(&format!("nodes/{node}/lxc/{vm_id}/resize"), &body)
            .await?;
        config_apply_from_response(node, response.data)
    }

    /// Destroys a container and returns the tracked destroy task.
    pub(crate) async fn delete_container(&self, node: &str, vm_id: u32) -> ProviderResult<TaskRef> {
        let response: PveResponse<String> =
            self.delete(&format!("nodes/{node}/lxc/{vm_id}")).await?;
        task_from_response(node, response.data)
    }

    /// Starts a stopped container.
    pub(crate) async fn start_container(&self, node: &str, vm_id: u32) -> ProviderResult<TaskRef> {
        let response: PveResponse<String> = self
            .post(
                &format!("nodes/{node}/lxc/{vm_id}/status/start"),
                &serde_json::json!({}),
            )
            .await?;
        task_from_response(node, response.data)
    }

    /// Stops a running container.
    pub(crate) async fn stop_container(&self, node: &str, vm_id: u32) -> ProviderResult<TaskRef> {
        let response: PveResponse<String> = self
            .post(
                &format!("nodes/{node}/lxc/{vm_id}/status/stop"),
                &serde_json::json!({}),
            )
            .await?;
        task_from_response(node, response.data)
    }

    /// Reads the status of a tracked task.
    pub(crate) async fn task_status(&self, task: &TaskRef) -> ProviderResult<TaskStatus> {
        let path = format!("nodes/{}/tasks/{}/status", task.node(), task.upid());
        let response: PveResponse<TaskStatus> = self.get(&path).await?;
        response
            .data
            .ok_or_else(|| ProviderError::NotFound(format!("No status for task {}", task.upid())))
    }

    // -- Generic verbs -------------------------------------------------

    async fn get<T>(&self, path: &str) -> ProviderResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.execute_request(reqwest::Method::GET, path, None::<&()>)
            .await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> ProviderResult<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        self.execute_request(reqwest::Method::POST, path, Some(body))
            .await
    }

    async fn put<B, T>(&self, path: &str, body: &B) -> ProviderResult<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        self.execute_request(reqwest::Method::PUT, path, Some(body))
            .await
    }

    async fn delete<T>(&self, path: &str) -> ProviderResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.execute_request(reqwest::Method::DELETE, path, None::<&()>)
            .await
    }

    /// Core request path: ensures authentication, applies rate limiting,
    /// sends the request and refreshes the ticket once on a 401.
    async fn execute_request<B, T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> ProviderResult<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        self.ensure_authenticated().await?;

        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let response = self.send_request(method.clone(), path, body).await?;

        // A ticket can outlive its configured lifetime estimate and still
        // be rejected server-side. Refresh once and retry; API tokens
        // have nothing to refresh.
        if response.status() == StatusCode::UNAUTHORIZED
            && self.connection.credentials().requires_login()
        {
            self.refresh_session().await?;
            let response = self.send_request(method, path, body).await?;
            return decode_response(response).await;
        }

        decode_response(response).await
    }

    async fn send_request<B>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> ProviderResult<reqwest::Response>
    where
        B: serde::Serialize,
    {
        let url = self.connection.endpoint().api_url(path);
        let mut req_builder = self.http_client.request(method, &url);

        if let Some(header) = self.connection.credentials().authorization_header() {
            req_builder = req_builder.header("Authorization", header);
        } else {
            let session_guard = self.session.read().await;
            if let Some(session) = session_guard.as_ref() {
                req_builder = req_builder.header("Cookie", session.ticket().as_cookie_header());
                if let Some(csrf) = session.csrf_token() {
                    req_builder = req_builder.header("CSRFPreventionToken", csrf.as_str());
                }
            }
        }

        if let Some(body) = body {
            req_builder = req_builder.json(body);
        }

        req_builder
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("HTTP request failed: {e}")))
    }

    /// Ensures a usable ticket session exists for ticket credentials.
    async fn ensure_authenticated(&self) -> ProviderResult<()> {
        if !self.connection.credentials().requires_login() {
            return Ok(());
        }

        let need_refresh = {
            let session_guard = self.session.read().await;
            match session_guard.as_ref() {
                Some(session) => session.ticket().is_expired(self.config.ticket_lifetime),
                None => true,
            }
        };

        if need_refresh {
            self.refresh_session().await?;
        }
        Ok(())
    }

    /// Performs a fresh login with the stored credentials.
    async fn refresh_session(&self) -> ProviderResult<()> {
        let service = LoginService::new();
        let session = service.execute(&self.connection).await?;
        self.set_session(session).await;
        Ok(())
    }
}

fn task_from_response(node: &str, data: Option<String>) -> ProviderResult<TaskRef> {
    let upid = data.ok_or_else(|| ProviderError::Api {
        status: 200,
        message: "Response did not include a task identifier".to_string(),
    })?;
    validate_upid(&upid).map_err(|e| ProviderError::Api {
        status: 200,
        message: e.to_string(),
    })?;
    Ok(TaskRef::new(node, upid))
}

fn config_apply_from_response(node: &str, data: Option<String>) -> ProviderResult<ConfigApply> {
    match data {
        Some(upid) if upid.starts_with("UPID:") => {
            validate_upid(&upid).map_err(|e| ProviderError::Api {
                status: 200,
                message: e.to_string(),
            })?;
            Ok(ConfigApply::Task(TaskRef::new(node, upid)))
        }
        _ => Ok(ConfigApply::Applied),
    }
}

async fn decode_response<T>(response: reqwest::Response) -> ProviderResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(translate_error(status, &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Connection(format!("Failed to parse response: {e}")))
}

/// Maps an HTTP failure onto the provider error taxonomy.
///
/// The hypervisor reports some well-known conditions as 500s with a
/// recognizable message, so the body is inspected before falling back to
/// the status code.
fn translate_error(status: StatusCode, body: &str) -> ProviderError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.trim().to_string()
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(message)
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::CONFLICT => ProviderError::Conflict(message),
        _ if mentions_missing_object(&message) => ProviderError::NotFound(message),
        _ if mentions_lock(&message) => ProviderError::Conflict(message),
        _ => ProviderError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn mentions_missing_object(message: &str) -> bool {
    message.contains("does not exist") || message.contains("no such")
}

fn mentions_lock(message: &str) -> bool {
    message.contains("locked") || message.contains("can't lock")
}
