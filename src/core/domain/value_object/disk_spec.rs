use crate::core::domain::error::ValidationError;
use std::fmt;

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;

/// Highest mount point index Proxmox accepts (`mp0` through `mp255`).
const MAX_MOUNT_INDEX: u32 = 255;

/// A parsed disk request.
///
/// Desired state declares disks as `"storage:size"` with the size in
/// gigabytes (`"local-lvm:8"`). The cluster reports the same disk as an
/// allocated volume (`"local-lvm:vm-210-disk-0,size=8G"`). Both forms
/// normalize into this type so sizes compare numerically: `"8"` and
/// `"8.0"` describe the same disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    storage: String,
    size_bytes: u64,
}

impl DiskSpec {
    /// Parses a desired-state value of the form `"storage:size"`.
    pub(crate) fn parse(raw: &str) -> Result<Self, ValidationError> {
        let (storage, size) = raw.split_once(':').ok_or_else(|| {
            ValidationError::Format(format!(
                "Disk '{raw}' must use the 'storage:size' form, e.g. 'local-lvm:8'"
            ))
        })?;
        validate_storage_name(storage)?;

        let size_gb: f64 = size.parse().map_err(|_| {
            ValidationError::Format(format!("Disk size '{size}' is not a number of gigabytes"))
        })?;
        if !size_gb.is_finite() || size_gb <= 0.0 {
            return Err(ValidationError::ConstraintViolation(format!(
                "Disk size must be a positive number of gigabytes, got '{size}'"
            )));
        }

        Ok(Self {
            storage: storage.to_string(),
            size_bytes: (size_gb * GIB as f64).round() as u64,
        })
    }

    /// Parses a live config value such as `"local-lvm:vm-210-disk-0,size=8G"`.
    ///
    /// Returns `None` for values this engine does not manage (bind mounts,
    /// volumes without a reported size).
    pub(crate) fn from_live_volume(raw: &str) -> Option<Self> {
        let (storage, rest) = raw.split_once(':')?;
        if storage.is_empty() || storage.starts_with('/') {
            return None;
        }

        let mut options = rest.split(',');
        let volume = options.next()?;
        for option in options {
            if let Some(size) = option.strip_prefix("size=") {
                return Some(Self {
                    storage: storage.to_string(),
                    size_bytes: parse_size(size)?,
                });
            }
        }

        // A bare "storage:8" (no allocated volume yet) is already in the
        // desired form.
        volume.parse::<f64>().ok().and_then(|gb| {
            (gb.is_finite() && gb > 0.0).then(|| Self {
                storage: storage.to_string(),
                size_bytes: (gb * GIB as f64).round() as u64,
            })
        })
    }

    /// Returns the storage pool this disk lives on.
    #[must_use]
    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Renders the size for a resize request (`"16G"`, `"1536M"`).
    pub(crate) fn resize_target(&self) -> String {
        if self.size_bytes % GIB == 0 {
            format!("{}G", self.size_bytes / GIB)
        } else {
            format!("{}M", self.size_bytes.div_ceil(MIB))
        }
    }
}

impl fmt::Display for DiskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.size_bytes % GIB == 0 {
            write!(f, "{}:{}", self.storage, self.size_bytes / GIB)
        } else {
            write!(f, "{}:{}", self.storage, self.size_bytes as f64 / GIB as f64)
        }
    }
}

/// Parses a Proxmox size string (`"8G"`, `"1536M"`, plain bytes).
fn parse_size(raw: &str) -> Option<u64> {
    let (digits, unit) = match raw.char_indices().last()? {
        (idx, c) if c.is_ascii_alphabetic() => (&raw[..idx], c),
        _ => (raw, 'B'),
    };
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let scale = match unit.to_ascii_uppercase() {
        'B' => 1,
        'K' => KIB,
        'M' => MIB,
        'G' => GIB,
        'T' => TIB,
        _ => return None,
    };
    Some((value * scale as f64).round() as u64)
}

/// Validates a disk mount point name: `rootfs` or `mp0` through `mp255`.
pub(crate) fn validate_mount_name(name: &str) -> Result<(), ValidationError> {
    if name == "rootfs" {
        return Ok(());
    }
    if let Some(index) = name.strip_prefix("mp") {
        match index.parse::<u32>() {
            Ok(n) if n <= MAX_MOUNT_INDEX && index == n.to_string() => return Ok(()),
            _ => {}
        }
    }
    Err(ValidationError::Field {
        field: "disks".to_string(),
        message: format!("'{name}' is not a valid mount point (expected 'rootfs' or 'mpN')"),
    })
}

fn validate_storage_name(storage: &str) -> Result<(), ValidationError> {
    if storage.is_empty() {
        return Err(ValidationError::Field {
            field: "disks".to_string(),
            message: "Storage pool name cannot be empty".to_string(),
        });
    }
    if !storage
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ValidationError::Format(format!(
            "Storage pool '{storage}' contains invalid characters"
        )));
    }
    Ok(())
}
