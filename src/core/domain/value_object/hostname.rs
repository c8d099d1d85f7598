use crate::core::domain::error::ValidationError;

const MAX_HOSTNAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Validates a container hostname against RFC 1123 label rules.
///
/// Proxmox stores the hostname verbatim in the container config, but the
/// guest and DNS both choke on malformed names, so they are rejected here
/// before anything reaches the cluster.
pub(crate) fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::Field {
            field: "hostname".to_string(),
            message: "Hostname cannot be empty".to_string(),
        });
    }

    if hostname.len() > MAX_HOSTNAME_LENGTH {
        return Err(ValidationError::ConstraintViolation(format!(
            "Hostname length exceeds maximum of {MAX_HOSTNAME_LENGTH} characters"
        )));
    }

    for label in hostname.split('.') {
        validate_label(label)?;
    }

    Ok(())
}

fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
        return Err(ValidationError::Format(format!(
            "Label must be between 1 and {MAX_LABEL_LENGTH} characters"
        )));
    }

    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::Format(
            "Label can only contain alphanumeric characters and hyphens".to_string(),
        ));
    }

    if label.starts_with('-') || label.ends_with('-') {
        return Err(ValidationError::Format(
            "Label cannot start or end with hyphen".to_string(),
        ));
    }

    Ok(())
}
