use crate::core::domain::error::ValidationError;
use std::time::{Duration, SystemTime};

/// A Proxmox authentication ticket.
///
/// Tickets are issued by `access/ticket` and expire server-side (two
/// hours by default), so the issue time is kept alongside the value to
/// refresh before the server starts rejecting requests.
#[derive(Debug, Clone)]
pub struct AuthTicket {
    value: String,
    issued_at: SystemTime,
}

impl AuthTicket {
    /// Creates a new ticket without validation.
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self {
            value,
            issued_at: SystemTime::now(),
        }
    }

    /// Checks if the ticket has outlived the given lifetime.
    #[must_use]
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.issued_at
            .elapsed()
            .map(|age| age > lifetime)
            .unwrap_or(true)
    }

    /// Formats the ticket as a cookie header value.
    #[must_use]
    pub fn as_cookie_header(&self) -> String {
        format!("PVEAuthCookie={}", self.value)
    }
}

/// A CSRF prevention token paired with a ticket.
///
/// Required on every mutating request (POST, PUT, DELETE) when the
/// session authenticates with a ticket.
#[derive(Debug, Clone)]
pub struct CsrfToken(String);

impl CsrfToken {
    /// Creates a new token without validation.
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    /// Returns the token value as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validates the format of a ticket string.
pub(crate) fn validate_ticket(ticket: &str) -> Result<(), ValidationError> {
    if ticket.is_empty() {
        return Err(ValidationError::Field {
            field: "ticket".to_string(),
            message: "Ticket cannot be empty".to_string(),
        });
    }
    let parts: Vec<&str> = ticket.split(':').collect();
    if parts.len() < 5 || parts[0] != "PVE" {
        return Err(ValidationError::Format(
            "Invalid ticket format: must start with 'PVE:' and have at least 5 parts".to_string(),
        ));
    }
    Ok(())
}

/// Validates the format of a CSRF prevention token.
pub(crate) fn validate_csrf_token(token: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Err(ValidationError::Field {
            field: "csrf_token".to_string(),
            message: "CSRF token cannot be empty".to_string(),
        });
    }
    let Some((timestamp, signature)) = token.split_once(':') else {
        return Err(ValidationError::Format(
            "Invalid CSRF token format: expected 'TIMESTAMP:SIGNATURE'".to_string(),
        ));
    };
    if timestamp.len() != 8 || !timestamp.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::Format(
            "Invalid CSRF token format: timestamp must be 8 hex characters".to_string(),
        ));
    }
    if signature.is_empty() {
        return Err(ValidationError::Format(
            "Invalid CSRF token format: missing signature".to_string(),
        ));
    }
    Ok(())
}
