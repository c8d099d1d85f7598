use crate::core::domain::value_object::{AuthTicket, CsrfToken};

/// An authenticated API session obtained from a ticket login.
#[derive(Debug, Clone)]
pub struct AuthSession {
    ticket: AuthTicket,
    csrf_token: Option<CsrfToken>,
}

impl AuthSession {
    pub fn new(ticket: AuthTicket, csrf_token: Option<CsrfToken>) -> Self {
        Self { ticket, csrf_token }
    }

    pub fn ticket(&self) -> &AuthTicket {
        &self.ticket
    }

    pub fn csrf_token(&self) -> Option<&CsrfToken> {
        self.csrf_token.as_ref()
    }
}
