use crate::core::domain::error::ValidationError;
use zxcvbn::zxcvbn;

const MAX_USERNAME_LENGTH: usize = 64;
const MAX_REALM_LENGTH: usize = 32;

/// Validates a Proxmox username (the part before `@realm`).
pub(crate) fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::Field {
            field: "username".to_string(),
            message: "Username cannot be empty".to_string(),
        });
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::Format(format!(
            "Username cannot exceed {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ValidationError::Format(
            "Username can only contain alphanumeric characters, hyphens, underscores and dots"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validates an authentication realm (`pam`, `pve`, an LDAP realm id).
pub(crate) fn validate_realm(realm: &str) -> Result<(), ValidationError> {
    if realm.is_empty() {
        return Err(ValidationError::Field {
            field: "realm".to_string(),
            message: "Realm cannot be empty".to_string(),
        });
    }
    if realm.len() > MAX_REALM_LENGTH {
        return Err(ValidationError::Format(format!(
            "Realm cannot exceed {MAX_REALM_LENGTH} characters"
        )));
    }
    if !realm
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError::Format(
            "Realm can only contain lowercase alphanumeric characters and hyphens".to_string(),
        ));
    }
    Ok(())
}

/// Validates an API token id of the form `user@realm!tokenname`.
pub(crate) fn validate_token_id(token_id: &str) -> Result<(), ValidationError> {
    let Some((user_part, token_name)) = token_id.split_once('!') else {
        return Err(ValidationError::Format(
            "Token id must use the 'user@realm!tokenname' form".to_string(),
        ));
    };
    let Some((username, realm)) = user_part.split_once('@') else {
        return Err(ValidationError::Format(
            "Token id must use the 'user@realm!tokenname' form".to_string(),
        ));
    };
    validate_username(username)?;
    validate_realm(realm)?;
    if token_name.is_empty()
        || !token_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(ValidationError::Field {
            field: "token_id".to_string(),
            message: format!("'{token_name}' is not a valid token name"),
        });
    }
    Ok(())
}

/// Validates a login password according to the configuration.
pub(crate) fn validate_password(
    password: &str,
    min_score: Option<zxcvbn::Score>,
) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::Field {
            field: "password".to_string(),
            message: "Password cannot be empty".to_string(),
        });
    }
    if password.len() > 128 {
        return Err(ValidationError::Format(
            "Password cannot exceed 128 characters".to_string(),
        ));
    }
    if let Some(min_score) = min_score {
        let entropy = zxcvbn(password, &[]);
        if entropy.score() < min_score {
            return Err(ValidationError::ConstraintViolation(
                "Password is too weak (increase complexity)".to_string(),
            ));
        }
    }
    Ok(())
}
