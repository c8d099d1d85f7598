//! Domain models for LXC container resources.
//!
//! This module defines the desired-state specification the orchestration
//! engine submits, the parameter structs sent to the Proxmox API and the
//! response models read back from it.

use crate::core::domain::{
    error::{ProviderResult, ValidationError},
    value_object::{
        DiskSpec, NetSpec, validate_hostname, validate_mount_name, validate_net_name,
        validate_vm_id,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container features Proxmox accepts in the `features` property.
const KNOWN_FEATURES: &[&str] = &["force_rw_sys", "fuse", "keyctl", "mknod", "mount", "nesting"];

/// Desired state for one LXC container.
///
/// Field defaults mirror what the API would pick for an absent value, so
/// a minimal specification (`node`, `vm_id`, `ostemplate`) produces a
/// working container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Cluster node the container lives on. May be omitted when the
    /// provider is configured with a default node.
    #[serde(default)]
    pub node: String,
    /// Container identifier (unique per cluster).
    pub vm_id: u32,
    /// Hostname set inside the guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// CPU cores available to the container.
    #[serde(default = "default_cores")]
    pub cores: u32,
    /// Memory limit in MB.
    #[serde(default = "default_memory")]
    pub memory: u64,
    /// Swap limit in MB.
    #[serde(default = "default_swap")]
    pub swap: u64,
    /// OS template volume (`storage:vztmpl/...`). Required for creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostemplate: Option<String>,
    /// Root password for the guest. Write-only: accepted on input, never
    /// recorded in state documents.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// SSH public keys installed for root at creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_keys: Option<String>,
    /// Run without mapping the root user (recommended).
    #[serde(default = "default_true")]
    pub unprivileged: bool,
    /// Disks by mount point (`rootfs`, `mpN`) as `"storage:size"` values.
    #[serde(default = "default_disks")]
    pub disks: BTreeMap<String, String>,
    /// Network interfaces by slot (`netN`) as option strings.
    #[serde(default = "default_networks")]
    pub networks: BTreeMap<String, String>,
    /// Container feature flags (`nesting`, `keyctl`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, String>,
    /// Start the container when the node boots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboot: Option<bool>,
    /// Boot order behavior (`order=N[,up=N][,down=N]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<String>,
    /// Start the container right after creation.
    #[serde(default = "default_true")]
    pub start_on_create: bool,
}

fn default_cores() -> u32 {
    1
}

fn default_memory() -> u64 {
    512
}

fn default_swap() -> u64 {
    512
}

fn default_true() -> bool {
    true
}

fn default_disks() -> BTreeMap<String, String> {
    BTreeMap::from([("rootfs".to_string(), "local-lvm:8".to_string())])
}

fn default_networks() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "net0".to_string(),
        "name=eth0,bridge=vmbr0,ip=dhcp".to_string(),
    )])
}

impl ContainerSpec {
    /// Checks the specification locally, before any API call.
    ///
    /// # Errors
    /// Returns `ProviderError::InvalidSpec` describing the first offending
    /// field.
    pub fn validate(&self) -> ProviderResult<()> {
        validate_node_name(&self.node)?;
        validate_vm_id(self.vm_id)?;

        if let Some(hostname) = &self.hostname {
            validate_hostname(hostname)?;
        }

        if self.cores == 0 || self.cores > 8192 {
            return Err(ValidationError::ConstraintViolation(format!(
                "Cores must be between 1 and 8192, got {}",
                self.cores
            ))
            .into());
        }
        if self.memory < 16 {
            return Err(ValidationError::ConstraintViolation(format!(
                "Memory must be at least 16 MB, got {}",
                self.memory
            ))
            .into());
        }

        if let Some(template) = &self.ostemplate {
            validate_ostemplate(template)?;
        }

        if let Some(password) = &self.password {
            if password.len() < 5 {
                return Err(ValidationError::Field {
                    field: "password".to_string(),
                    message: "Root password must be at least 5 characters long".to_string(),
                }
                .into());
            }
            if password.len() > 128 {
                return Err(ValidationError::Field {
                    field: "password".to_string(),
                    message: "Root password cannot exceed 128 characters".to_string(),
                }
                .into());
            }
        }

        if !self.disks.contains_key("rootfs") {
            return Err(ValidationError::Field {
                field: "disks".to_string(),
                message: "A 'rootfs' disk is required".to_string(),
            }
            .into());
        }
        for (mount, value) in &self.disks {
            validate_mount_name(mount)?;
            DiskSpec::parse(value)?;
        }

        for (slot, value) in &self.networks {
            validate_net_name(slot)?;
            NetSpec::parse(value)?;
        }

        self.validate_features()?;

        if let Some(startup) = &self.startup {
            validate_startup(startup)?;
        }

        Ok(())
    }

    fn validate_features(&self) -> Result<(), ValidationError> {
        for (feature, value) in &self.features {
            if !KNOWN_FEATURES.contains(&feature.as_str()) {
                return Err(ValidationError::Field {
                    field: "features".to_string(),
                    message: format!("Unknown container feature '{feature}'"),
                });
            }
            if value.is_empty() {
                return Err(ValidationError::Field {
                    field: "features".to_string(),
                    message: format!("Feature '{feature}' has an empty value"),
                });
            }
            // nfs/cifs mounts need a privileged container.
            if feature == "mount"
                && self.unprivileged
                && value.split(';').any(|fs| fs == "nfs" || fs == "cifs")
            {
                return Err(ValidationError::ConstraintViolation(
                    "mount=nfs/cifs requires a privileged container".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_node_name(node: &str) -> Result<(), ValidationError> {
    if node.is_empty() {
        return Err(ValidationError::Field {
            field: "node".to_string(),
            message: "Node cannot be empty".to_string(),
        });
    }
    if !node
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
        || node.starts_with('-')
        || node.ends_with('-')
    {
        return Err(ValidationError::Field {
            field: "node".to_string(),
            message: format!("'{node}' is not a valid node name"),
        });
    }
    Ok(())
}

fn validate_ostemplate(template: &str) -> Result<(), ValidationError> {
    match template.split_once(':') {
        Some((storage, volume)) if !storage.is_empty() && !volume.is_empty() => Ok(()),
        _ => Err(ValidationError::Field {
            field: "ostemplate".to_string(),
            message: format!("'{template}' must reference a template volume, e.g. 'local:vztmpl/...'"),
        }),
    }
}

fn validate_startup(startup: &str) -> Result<(), ValidationError> {
    for part in startup.split(',') {
        let valid = match part.split_once('=') {
            Some(("order" | "up" | "down", value)) => value.parse::<u32>().is_ok(),
            _ => false,
        };
        if !valid {
            return Err(ValidationError::Field {
                field: "startup".to_string(),
                message: format!("'{startup}' is not a valid startup rule"),
            });
        }
    }
    Ok(())
}

/// Renders an option map to the API's `key=value,key=value` form.
pub(crate) fn render_option_map(options: &BTreeMap<String, String>) -> String {
    options
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a `key=value,key=value` string into an option map.
pub(crate) fn parse_option_map(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Parameters for `POST /nodes/{node}/lxc`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateParams {
    pub vmid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub cores: u32,
    pub memory: u64,
    pub swap: u64,
    pub ostemplate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "ssh-public-keys", skip_serializing_if = "Option::is_none")]
    pub ssh_public_keys: Option<String>,
    pub unprivileged: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboot: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup: Option<String>,
    #[serde(flatten)]
    pub disks: BTreeMap<String, String>,
    #[serde(flatten)]
    pub networks: BTreeMap<String, String>,
}

impl CreateParams {
    /// Maps a validated specification onto creation parameters.
    ///
    /// # Errors
    /// Returns `ProviderError::InvalidSpec` when the specification has no
    /// `ostemplate`; templates only matter at creation time, so the check
    /// lives here instead of `validate`.
    pub fn from_spec(spec: &ContainerSpec) -> ProviderResult<Self> {
        let ostemplate = spec.ostemplate.clone().ok_or_else(|| ValidationError::Field {
            field: "ostemplate".to_string(),
            message: "An OS template is required to create a container".to_string(),
        })?;

        Ok(Self {
            vmid: spec.vm_id,
            hostname: spec.hostname.clone(),
            cores: spec.cores,
            memory: spec.memory,
            swap: spec.swap,
            ostemplate,
            password: spec.password.clone(),
            ssh_public_keys: spec.ssh_public_keys.clone(),
            unprivileged: u8::from(spec.unprivileged),
            features: (!spec.features.is_empty()).then(|| render_option_map(&spec.features)),
            onboot: spec.onboot.map(u8::from),
            startup: spec.startup.clone(),
            disks: spec.disks.clone(),
            networks: spec.networks.clone(),
        })
    }
}

/// Parameters for `PUT /nodes/{node}/lxc/{vmid}/config`.
///
/// Only fields that actually change are set; the API leaves absent
/// properties untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboot: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup: Option<String>,
    /// Comma-separated option names to remove (`"net1,net2"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
    #[serde(flatten)]
    pub networks: BTreeMap<String, String>,
}

impl UpdateParams {
    /// Returns `true` when no property would be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.cores.is_none()
            && self.memory.is_none()
            && self.swap.is_none()
            && self.features.is_none()
            && self.onboot.is_none()
            && self.startup.is_none()
            && self.delete.is_none()
            && self.networks.is_empty()
    }
}

/// Container configuration from `GET /nodes/{node}/lxc/{vmid}/config`.
///
/// Disk and network properties come back under dynamic keys (`rootfs`,
/// `mp0`, `net0`, ...), captured in `extra` and extracted on demand.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LxcConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unprivileged: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboot: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LxcConfig {
    /// Extracts managed disks in canonical `"storage:size"` form.
    ///
    /// Bind mounts and volumes without a reported size are not managed by
    /// this engine and are left out.
    #[must_use]
    pub fn disks(&self) -> BTreeMap<String, String> {
        self.extra
            .iter()
            .filter(|(key, _)| validate_mount_name(key).is_ok())
            .filter_map(|(key, value)| {
                let raw = value.as_str()?;
                let disk = DiskSpec::from_live_volume(raw)?;
                Some((key.clone(), disk.to_string()))
            })
            .collect()
    }

    /// Extracts network interfaces keyed by slot, values verbatim.
    #[must_use]
    pub fn networks(&self) -> BTreeMap<String, String> {
        self.extra
            .iter()
            .filter(|(key, _)| validate_net_name(key).is_ok())
            .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
            .collect()
    }

    /// Parses the feature string into a map.
    #[must_use]
    pub fn features_map(&self) -> BTreeMap<String, String> {
        self.features
            .as_deref()
            .map(parse_option_map)
            .unwrap_or_default()
    }
}

/// Runtime status from `GET /nodes/{node}/lxc/{vmid}/status/current`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LxcStatus {
    /// Current status (`"running"`, `"stopped"`).
    pub status: String,
    /// Active operation lock (`"create"`, `"destroy"`, ...), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
}

impl LxcStatus {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}
