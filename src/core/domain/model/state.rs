//! Recorded container state and its engine-facing document form.

use crate::core::domain::{
    error::{ProviderError, ProviderResult},
    model::container::{ContainerSpec, LxcConfig, LxcStatus},
    value_object::{DiskSpec, NetSpec},
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The state recorded after a successful operation.
///
/// Structurally the desired specification (minus secrets) plus the
/// provider-assigned fields. The orchestration engine persists this as an
/// opaque JSON document and hands it back on the next invocation; nothing
/// here survives in memory between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(flatten)]
    pub spec: ContainerSpec,
    /// Container status observed when the state was recorded.
    pub status: String,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: u64,
    /// Identifiers of the tracked tasks issued for this container, in
    /// issue order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_history: Vec<String>,
}

impl ContainerState {
    /// Builds the state recorded after an apply, from the specification
    /// that was just applied.
    ///
    /// The root password is scrubbed: it is write-only and must never end
    /// up in a state document.
    pub(crate) fn from_applied(
        spec: &ContainerSpec,
        status: &str,
        created_at: u64,
        task_history: Vec<String>,
    ) -> Self {
        let mut spec = spec.clone();
        spec.password = None;
        Self {
            spec,
            status: status.to_string(),
            created_at,
            task_history,
        }
    }

    /// Builds a state from a freshly fetched config and status.
    ///
    /// Values that survive from the prior state:
    /// - create-only fields the API never reports back (`ostemplate`,
    ///   `ssh_public_keys`) and the provider-assigned bookkeeping;
    /// - the recorded form of a value the cluster reports in an expanded
    ///   but equivalent way (disk sizes, interface strings with generated
    ///   options such as `hwaddr`), so unchanged fields do not show up as
    ///   drift.
    pub(crate) fn from_live(
        node: &str,
        vm_id: u32,
        config: &LxcConfig,
        status: &LxcStatus,
        prior: Option<&ContainerState>,
    ) -> Self {
        let mut disks = config.disks();
        let mut networks = config.networks();

        if let Some(prior) = prior {
            for (mount, live_value) in disks.iter_mut() {
                if let Some(recorded) = prior.spec.disks.get(mount) {
                    let equivalent = matches!(
                        (DiskSpec::parse(live_value), DiskSpec::parse(recorded)),
                        (Ok(live), Ok(rec)) if live == rec
                    );
                    if equivalent {
                        live_value.clone_from(recorded);
                    }
                }
            }
            for (slot, live_value) in networks.iter_mut() {
                if let Some(recorded) = prior.spec.networks.get(slot) {
                    let covered = matches!(
                        (NetSpec::parse(live_value), NetSpec::parse(recorded)),
                        (Ok(live), Ok(rec)) if rec
                            .options()
                            .iter()
                            .all(|(key, value)| live.options().get(key) == Some(value))
                    );
                    if covered {
                        live_value.clone_from(recorded);
                    }
                }
            }
        }

        let spec = ContainerSpec {
            node: node.to_string(),
            vm_id,
            hostname: config.hostname.clone(),
            cores: config.cores.unwrap_or(1),
            memory: config.memory.unwrap_or(512),
            swap: config.swap.unwrap_or(512),
            ostemplate: prior.and_then(|p| p.spec.ostemplate.clone()),
            password: None,
            ssh_public_keys: prior.and_then(|p| p.spec.ssh_public_keys.clone()),
            unprivileged: config.unprivileged == Some(1),
            disks,
            networks,
            features: config.features_map(),
            onboot: config.onboot.map(|v| v == 1),
            startup: config.startup.clone(),
            start_on_create: prior.map(|p| p.spec.start_on_create).unwrap_or(true),
        };

        Self {
            spec,
            status: status.status.clone(),
            created_at: prior.map(|p| p.created_at).unwrap_or_else(now_epoch),
            task_history: prior.map(|p| p.task_history.clone()).unwrap_or_default(),
        }
    }

    /// Serializes the state into the document form the engine persists.
    ///
    /// # Errors
    /// Returns `ProviderError::Document` if the state cannot be encoded.
    pub fn to_document(&self) -> ProviderResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| ProviderError::Document(e.to_string()))
    }

    /// Decodes a state document produced by `to_document`.
    ///
    /// # Errors
    /// Returns `ProviderError::Document` for malformed input.
    pub fn from_document(document: serde_json::Value) -> ProviderResult<Self> {
        serde_json::from_value(document).map_err(|e| ProviderError::Document(e.to_string()))
    }
}

/// Current time as seconds since the Unix epoch.
pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
