use crate::core::domain::value_object::ApiEndpoint;

/// How the provider authenticates against the API.
///
/// Ticket credentials are exchanged for a session cookie on first use and
/// refreshed when it expires. API tokens are stateless and sent with every
/// request.
#[derive(Clone)]
pub enum Credentials {
    /// Username and password login via `access/ticket`.
    Ticket {
        username: String,
        password: String,
        realm: String,
    },
    /// A pre-provisioned API token (`user@realm!tokenname` plus secret).
    ApiToken { token_id: String, secret: String },
}

impl Credentials {
    /// Returns `true` when a ticket login round-trip is needed.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Ticket { .. })
    }

    /// Returns the `Authorization` header value for token credentials.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            Self::ApiToken { token_id, secret } => {
                Some(format!("PVEAPIToken={token_id}={secret}"))
            }
            Self::Ticket { .. } => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ticket {
                username, realm, ..
            } => f
                .debug_struct("Ticket")
                .field("username", username)
                .field("realm", realm)
                .finish_non_exhaustive(),
            Self::ApiToken { token_id, .. } => f
                .debug_struct("ApiToken")
                .field("token_id", token_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Connection details for one Proxmox VE cluster.
pub struct ProxmoxConnection {
    endpoint: ApiEndpoint,
    credentials: Credentials,
    accept_invalid_certs: bool,
}

impl ProxmoxConnection {
    pub fn new(endpoint: ApiEndpoint, credentials: Credentials, accept_invalid_certs: bool) -> Self {
        Self {
            endpoint,
            credentials,
            accept_invalid_certs,
        }
    }

    pub fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }
}

impl std::fmt::Debug for ProxmoxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxmoxConnection")
            .field("endpoint", &self.endpoint.as_str())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}
