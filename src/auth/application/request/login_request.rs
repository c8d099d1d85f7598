use serde::Serialize;

/// Payload for `POST /api2/json/access/ticket`.
#[derive(Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub realm: String,
}
