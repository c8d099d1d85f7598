use crate::core::domain::error::ValidationError;
use url::Url;

const MAX_URL_LENGTH: usize = 2083;

/// The base URL of a Proxmox VE API endpoint.
///
/// Wraps a parsed URL such as `https://pve.example.com:8006` and derives
/// the `/api2/json` request URLs from it.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    url: Url,
}

impl ApiEndpoint {
    /// Parses and validates an endpoint URL.
    pub(crate) fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::Field {
                field: "endpoint".to_string(),
                message: "Endpoint cannot be empty".to_string(),
            });
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(ValidationError::Format(format!(
                "Endpoint exceeds maximum length of {MAX_URL_LENGTH} characters"
            )));
        }

        let url = Url::parse(raw)
            .map_err(|e| ValidationError::Format(format!("Invalid endpoint URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::ConstraintViolation(
                "Endpoint scheme must be http or https".to_string(),
            ));
        }
        if url.host_str().is_none() {
            return Err(ValidationError::Field {
                field: "endpoint".to_string(),
                message: "Endpoint URL has no host".to_string(),
            });
        }

        Ok(Self { url })
    }

    /// Returns the endpoint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Builds a full API request URL for a path below `/api2/json`.
    #[must_use]
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api2/json/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
