//! Reconciliation of LXC containers against their desired state.

use crate::{
    core::domain::{
        error::{ProviderError, ProviderResult},
        model::{
            ChangeKind, ChangePlan, ContainerSpec, ContainerState, diff,
            container::{CreateParams, UpdateParams, render_option_map},
            state::now_epoch,
        },
        value_object::DiskSpec,
    },
    core::infrastructure::{
        api_client::{ApiClient, ConfigApply},
        retry::retry_transient,
        task_poller::TaskPoller,
    },
    provider::handler::ResourceHandler,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How `update` reconciled the container.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The container already matched; nothing was sent.
    Unchanged(ContainerState),
    /// Changes were applied to the existing container.
    Updated(ContainerState),
    /// A replace-forcing change destroyed and recreated it.
    Replaced(ContainerState),
}

impl UpdateOutcome {
    #[must_use]
    pub fn state(&self) -> &ContainerState {
        match self {
            Self::Unchanged(state) | Self::Updated(state) | Self::Replaced(state) => state,
        }
    }

    #[must_use]
    pub fn into_state(self) -> ContainerState {
        match self {
            Self::Unchanged(state) | Self::Updated(state) | Self::Replaced(state) => state,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Self::Unchanged(_) => "unchanged",
            Self::Updated(_) => "updated",
            Self::Replaced(_) => "replaced",
        }
    }
}

/// Drives one container through the create/read/update/delete contract.
///
/// Holds no per-container state: every method takes the full context it
/// needs and runs to completion, so concurrent invocations for different
/// containers are safe on one shared instance.
#[derive(Clone)]
pub struct LxcReconciler {
    client: Arc<ApiClient>,
    cancel: Option<watch::Receiver<bool>>,
}

impl LxcReconciler {
    pub(crate) fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cancel: None,
        }
    }

    /// Attaches the cancellation signal handed to task polling.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn poller(&self) -> TaskPoller<'_> {
        let poller = TaskPoller::new(&self.client, self.client.config().poll);
        match &self.cancel {
            Some(cancel) => poller.with_cancel(cancel.clone()),
            None => poller,
        }
    }

    /// Creates the container and returns its recorded state.
    ///
    /// A creation task that fails or times out triggers a best-effort
    /// compensating delete of whatever half-created container exists, and
    /// the original error surfaces. A start failure afterwards does not
    /// fail the create: the container exists and is recorded.
    pub async fn create(&self, spec: &ContainerSpec) -> ProviderResult<ContainerState> {
        spec.validate()?;
        let params = CreateParams::from_spec(spec)?;
        let retry = &self.client.config().retry;

        info!("Creating container {} on node {}", spec.vm_id, spec.node);
        let task =
            retry_transient(retry, || self.client.create_container(&spec.node, &params)).await?;
        let mut task_history = vec![task.upid().to_string()];

        if let Err(create_err) = self.poller().await_task(&task).await {
            // On cancellation the task was drained, not abandoned; the
            // engine re-reads and decides what to keep, so no cleanup.
            if matches!(create_err, ProviderError::Cancelled { .. }) {
                return Err(create_err);
            }
            self.cleanup_failed_create(spec).await;
            return Err(create_err);
        }

        if spec.start_on_create {
            match self.client.start_container(&spec.node, spec.vm_id).await {
                Ok(start_task) => {
                    task_history.push(start_task.upid().to_string());
                    if let Err(e) = self.poller().await_task(&start_task).await {
                        warn!("Container {} created but did not start: {}", spec.vm_id, e);
                    }
                }
                Err(e) => {
                    warn!(
                        "Container {} created but the start request failed: {}",
                        spec.vm_id, e
                    );
                }
            }
        }

        let status =
            retry_transient(retry, || self.client.fetch_status(&spec.node, spec.vm_id)).await?;
        Ok(ContainerState::from_applied(
            spec,
            &status.status,
            now_epoch(),
            task_history,
        ))
    }

    /// Refreshes recorded state against the cluster.
    ///
    /// `Ok(None)` means the container is gone; the caller reports drift
    /// instead of failing. Create-only fields carry over from `prior`.
    pub async fn read(
        &self,
        node: &str,
        vm_id: u32,
        prior: Option<&ContainerState>,
    ) -> ProviderResult<Option<ContainerState>> {
        let config = match self.client.fetch_config(node, vm_id).await {
            Ok(config) => config,
            Err(ProviderError::NotFound(_)) => {
                debug!("Container {} is gone from node {}", vm_id, node);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let status = match self.client.fetch_status(node, vm_id).await {
            Ok(status) => status,
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(Some(ContainerState::from_live(
            node, vm_id, &config, &status, prior,
        )))
    }

    /// Computes the change plan without touching the cluster.
    #[must_use]
    pub fn diff(&self, desired: &ContainerSpec, recorded: &ContainerState) -> ChangePlan {
        diff::plan(desired, &recorded.spec)
    }

    /// Reconciles the container toward `desired`.
    ///
    /// Any replace-forcing change turns the update into a delete followed
    /// by a create, as two separately tracked operations. In-place
    /// changes batch into one configuration write plus one resize per
    /// grown disk, each awaited in order. A failure after the first
    /// applied change surfaces as `PartialUpdate` carrying freshly read
    /// state, so the engine never records a stale document.
    pub async fn update(
        &self,
        desired: &ContainerSpec,
        recorded: &ContainerState,
    ) -> ProviderResult<UpdateOutcome> {
        desired.validate()?;
        let plan = diff::plan(desired, &recorded.spec);

        if plan.is_noop() {
            debug!("Container {} already matches its specification", desired.vm_id);
            return Ok(UpdateOutcome::Unchanged(recorded.clone()));
        }

        if plan.requires_replace() {
            info!(
                "Replacing container {}: {} change(s), at least one cannot apply in place",
                recorded.spec.vm_id,
                plan.changes().len()
            );
            self.delete(recorded).await?;
            let state = self.create(desired).await?;
            return Ok(UpdateOutcome::Replaced(state));
        }

        info!(
            "Updating container {} in place ({} changes)",
            desired.vm_id,
            plan.changes().len()
        );
        let mut task_history = recorded.task_history.clone();
        let mut applied = false;
        match self
            .apply_in_place(desired, &plan, &mut task_history, &mut applied)
            .await
        {
            Ok(()) => {
                let retry = &self.client.config().retry;
                let status = retry_transient(retry, || {
                    self.client.fetch_status(&desired.node, desired.vm_id)
                })
                .await?;
                Ok(UpdateOutcome::Updated(ContainerState::from_applied(
                    desired,
                    &status.status,
                    recorded.created_at,
                    task_history,
                )))
            }
            Err(source) if applied => {
                warn!(
                    "Update of container {} failed after applying changes: {}",
                    desired.vm_id, source
                );
                match self.read(&desired.node, desired.vm_id, Some(recorded)).await {
                    Ok(Some(state)) => Err(ProviderError::PartialUpdate {
                        state: Box::new(state),
                        source: Box::new(source),
                    }),
                    // Without a fresh view, the original error is all we
                    // can report.
                    Ok(None) | Err(_) => Err(source),
                }
            }
            Err(source) => Err(source),
        }
    }

    /// Deletes the container, treating absence as success at every step.
    ///
    /// A running container is stopped first, with the stop task awaited;
    /// lock conflicts are retried on the provider's backoff schedule.
    pub async fn delete(&self, recorded: &ContainerState) -> ProviderResult<()> {
        let node = &recorded.spec.node;
        let vm_id = recorded.spec.vm_id;
        let retry = &self.client.config().retry;

        let status = match self.client.fetch_status(node, vm_id).await {
            Ok(status) => status,
            Err(ProviderError::NotFound(_)) => {
                debug!("Container {} is already absent from node {}", vm_id, node);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some(lock) = &status.lock {
            debug!("Container {} is locked ({})", vm_id, lock);
        }

        if status.is_running() {
            info!("Stopping container {} before deletion", vm_id);
            let stop = retry_transient(retry, || self.client.stop_container(node, vm_id)).await?;
            self.poller().await_task(&stop).await?;
        }

        info!("Deleting container {} on node {}", vm_id, node);
        let task = match retry_transient(retry, || self.client.delete_container(node, vm_id)).await
        {
            Ok(task) => task,
            Err(ProviderError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        match self.poller().await_task(&task).await {
            Ok(()) => Ok(()),
            // A destroy task finding nothing left to destroy is success.
            Err(ProviderError::TaskFailed { reason, .. }) if reason.contains("does not exist") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_in_place(
        &self,
        desired: &ContainerSpec,
        plan: &ChangePlan,
        task_history: &mut Vec<String>,
        applied: &mut bool,
    ) -> ProviderResult<()> {
        let node = &desired.node;
        let vm_id = desired.vm_id;
        let retry = &self.client.config().retry;

        let params = build_update_params(desired, plan);
        if !params.is_empty() {
            debug!("Writing configuration of container {}", vm_id);
            let apply =
                retry_transient(retry, || self.client.update_config(node, vm_id, &params)).await?;
            *applied = true;
            if let ConfigApply::Task(task) = apply {
                task_history.push(task.upid().to_string());
                self.poller().await_task(&task).await?;
            }
        }

        // Disk operations serialize per container, so each resize task is
        // awaited before the next one is issued.
        for (mount, size) in resize_targets(desired, plan)? {
            info!("Growing disk {} of container {} to {}", mount, vm_id, size);
            let apply = retry_transient(retry, || {
                self.client.resize_disk(node, vm_id, &mount, &size)
            })
            .await?;
            *applied = true;
            if let ConfigApply::Task(task) = apply {
                task_history.push(task.upid().to_string());
                self.poller().await_task(&task).await?;
            }
        }

        Ok(())
    }

    /// Removes whatever a failed creation left behind.
    ///
    /// Runs without the cancellation signal so an already-issued destroy
    /// is always drained. Failures are logged, never surfaced: the
    /// creation error is the one the caller needs to see.
    async fn cleanup_failed_create(&self, spec: &ContainerSpec) {
        if let Err(ProviderError::NotFound(_)) =
            self.client.fetch_status(&spec.node, spec.vm_id).await
        {
            return;
        }

        warn!(
            "Cleaning up container {} after a failed creation",
            spec.vm_id
        );
        match self.client.delete_container(&spec.node, spec.vm_id).await {
            Ok(task) => {
                let poller = TaskPoller::new(&self.client, self.client.config().poll);
                if let Err(e) = poller.await_task(&task).await {
                    warn!("Cleanup of container {} did not finish: {}", spec.vm_id, e);
                }
            }
            Err(ProviderError::NotFound(_)) => {}
            Err(e) => warn!("Failed to clean up container {}: {}", spec.vm_id, e),
        }
    }
}

/// Collects every in-place configuration change into one request.
fn build_update_params(desired: &ContainerSpec, plan: &ChangePlan) -> UpdateParams {
    let mut params = UpdateParams::default();
    let mut deletes: Vec<String> = Vec::new();

    for change in plan.changes() {
        if change.kind != ChangeKind::UpdateInPlace {
            continue;
        }
        match change.field.as_str() {
            "hostname" => match &desired.hostname {
                Some(hostname) => params.hostname = Some(hostname.clone()),
                None => deletes.push("hostname".to_string()),
            },
            "cores" => params.cores = Some(desired.cores),
            "memory" => params.memory = Some(desired.memory),
            "swap" => params.swap = Some(desired.swap),
            "features" => {
                if desired.features.is_empty() {
                    deletes.push("features".to_string());
                } else {
                    params.features = Some(render_option_map(&desired.features));
                }
            }
            "onboot" => match desired.onboot {
                Some(onboot) => params.onboot = Some(u8::from(onboot)),
                None => deletes.push("onboot".to_string()),
            },
            "startup" => match &desired.startup {
                Some(startup) => params.startup = Some(startup.clone()),
                None => deletes.push("startup".to_string()),
            },
            field => {
                if let Some(slot) = field.strip_prefix("networks.") {
                    match desired.networks.get(slot) {
                        Some(value) => {
                            params.networks.insert(slot.to_string(), value.clone());
                        }
                        None => deletes.push(slot.to_string()),
                    }
                }
                // disks.* changes are carried out by the resize pass.
            }
        }
    }

    if !deletes.is_empty() {
        params.delete = Some(deletes.join(","));
    }
    params
}

/// Returns the grown disks as `(mount, absolute size)` resize arguments.
fn resize_targets(
    desired: &ContainerSpec,
    plan: &ChangePlan,
) -> ProviderResult<Vec<(String, String)>> {
    let mut targets = Vec::new();
    for change in plan.changes() {
        if change.kind != ChangeKind::UpdateInPlace {
            continue;
        }
        let Some(mount) = change.field.strip_prefix("disks.") else {
            continue;
        };
        let Some(raw) = desired.disks.get(mount) else {
            continue;
        };
        let disk = DiskSpec::parse(raw)?;
        targets.push((mount.to_string(), disk.resize_target()));
    }
    Ok(targets)
}

/// JSON adapter exposing the reconciler at the orchestration boundary.
pub struct LxcHandler {
    reconciler: LxcReconciler,
}

impl LxcHandler {
    #[must_use]
    pub fn new(reconciler: LxcReconciler) -> Self {
        Self { reconciler }
    }

    fn decode_spec(&self, document: Value) -> ProviderResult<ContainerSpec> {
        let mut spec: ContainerSpec = serde_json::from_value(document).map_err(|e| {
            ProviderError::Document(format!("Invalid container specification: {e}"))
        })?;
        if spec.node.is_empty() {
            if let Some(default) = &self.reconciler.client.config().default_node {
                spec.node = default.clone();
            }
        }
        Ok(spec)
    }
}

#[async_trait]
impl ResourceHandler for LxcHandler {
    fn type_name(&self) -> &'static str {
        "proxmox:lxc"
    }

    async fn create(&self, spec: Value) -> ProviderResult<Value> {
        let spec = self.decode_spec(spec)?;
        self.reconciler.create(&spec).await?.to_document()
    }

    async fn read(&self, state: Value) -> ProviderResult<Option<Value>> {
        let recorded = ContainerState::from_document(state)?;
        let live = self
            .reconciler
            .read(&recorded.spec.node, recorded.spec.vm_id, Some(&recorded))
            .await?;
        live.map(|state| state.to_document()).transpose()
    }

    async fn update(&self, spec: Value, state: Value) -> ProviderResult<Value> {
        let desired = self.decode_spec(spec)?;
        let recorded = ContainerState::from_document(state)?;
        let outcome = self.reconciler.update(&desired, &recorded).await?;
        Ok(serde_json::json!({
            "action": outcome.action(),
            "state": outcome.state().to_document()?,
        }))
    }

    async fn delete(&self, state: Value) -> ProviderResult<()> {
        let recorded = ContainerState::from_document(state)?;
        self.reconciler.delete(&recorded).await
    }

    fn diff(&self, spec: Value, state: Value) -> ProviderResult<Value> {
        let desired = self.decode_spec(spec)?;
        let recorded = ContainerState::from_document(state)?;
        Ok(diff::plan(&desired, &recorded.spec).to_document())
    }
}
