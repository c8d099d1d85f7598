use crate::core::domain::error::ValidationError;
use std::collections::BTreeMap;

/// Highest network interface index Proxmox accepts (`net0` through `net31`).
const MAX_NET_INDEX: u32 = 31;

/// A parsed network interface definition.
///
/// Desired state declares interfaces as comma-separated `key=value`
/// options (`"name=eth0,bridge=vmbr0,ip=dhcp"`). The option order is not
/// significant, so two values with the same option set compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetSpec {
    options: BTreeMap<String, String>,
}

impl NetSpec {
    /// Parses a desired-state interface value.
    pub(crate) fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::Field {
                field: "networks".to_string(),
                message: "Interface definition cannot be empty".to_string(),
            });
        }

        let mut options = BTreeMap::new();
        for part in raw.split(',') {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ValidationError::Format(format!(
                    "Interface option '{part}' must use the 'key=value' form"
                ))
            })?;
            if key.is_empty() || value.is_empty() {
                return Err(ValidationError::Format(format!(
                    "Interface option '{part}' has an empty key or value"
                )));
            }
            if options.insert(key.to_string(), value.to_string()).is_some() {
                return Err(ValidationError::Format(format!(
                    "Interface option '{key}' given more than once"
                )));
            }
        }

        if !options.contains_key("name") {
            return Err(ValidationError::Field {
                field: "networks".to_string(),
                message: "Interface definition requires a 'name' option".to_string(),
            });
        }

        Ok(Self { options })
    }

    /// Returns the parsed options, sorted by key.
    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }
}

/// Validates a network interface slot name: `net0` through `net31`.
pub(crate) fn validate_net_name(name: &str) -> Result<(), ValidationError> {
    if let Some(index) = name.strip_prefix("net") {
        match index.parse::<u32>() {
            Ok(n) if n <= MAX_NET_INDEX && index == n.to_string() => return Ok(()),
            _ => {}
        }
    }
    Err(ValidationError::Field {
        field: "networks".to_string(),
        message: format!("'{name}' is not a valid interface slot (expected 'net0'..'net{MAX_NET_INDEX}')"),
    })
}
