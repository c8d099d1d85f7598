use serde::Deserialize;

/// Body of a successful `access/ticket` login.
#[derive(Deserialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

/// The issued ticket and its paired CSRF prevention token.
#[derive(Deserialize)]
pub struct LoginResponseData {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
}
