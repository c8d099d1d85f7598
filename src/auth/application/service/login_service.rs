use crate::{
    auth::application::{
        request::login_request::LoginRequest, response::login_response::LoginResponse,
    },
    core::domain::{
        error::{ProviderError, ProviderResult},
        model::{AuthSession, Credentials, ProxmoxConnection},
        value_object::{AuthTicket, CsrfToken, validate_csrf_token, validate_ticket},
    },
};

use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue},
};

/// Exchanges ticket credentials for an authenticated session.
///
/// Only ticket credentials go through this exchange; API tokens are sent
/// directly with each request and never log in.
pub struct LoginService {
    default_headers: HeaderMap,
}

impl LoginService {
    pub fn new() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Self { default_headers }
    }

    pub async fn execute(&self, connection: &ProxmoxConnection) -> ProviderResult<AuthSession> {
        let request = self.build_login_request(connection)?;

        let http_client = Client::builder()
            .danger_accept_invalid_certs(connection.accepts_invalid_certs())
            .build()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let url = connection.endpoint().api_url("access/ticket");
        let response = self.send_request(&http_client, &url, &request).await?;

        match response.status() {
            StatusCode::OK => self.handle_successful_login(response).await,
            StatusCode::UNAUTHORIZED => Err(ProviderError::Authentication(
                "Invalid credentials provided".to_string(),
            )),
            StatusCode::BAD_REQUEST => Err(ProviderError::Api {
                status: 400,
                message: "Login request was rejected".to_string(),
            }),
            StatusCode::NOT_FOUND => Err(ProviderError::Connection(
                "Login endpoint not found".to_string(),
            )),
            StatusCode::SERVICE_UNAVAILABLE => Err(ProviderError::Connection(
                "Proxmox service is currently unavailable".to_string(),
            )),
            status => Err(ProviderError::Connection(format!(
                "Unexpected response status: {status}"
            ))),
        }
    }

    fn build_login_request(&self, connection: &ProxmoxConnection) -> ProviderResult<LoginRequest> {
        match connection.credentials() {
            Credentials::Ticket {
                username,
                password,
                realm,
            } => Ok(LoginRequest {
                username: username.clone(),
                password: password.clone(),
                realm: realm.clone(),
            }),
            Credentials::ApiToken { .. } => Err(ProviderError::Authentication(
                "API token credentials do not use ticket login".to_string(),
            )),
        }
    }

    async fn send_request(
        &self,
        client: &Client,
        url: &str,
        request: &LoginRequest,
    ) -> ProviderResult<reqwest::Response> {
        client
            .post(url)
            .headers(self.default_headers.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))
    }

    async fn handle_successful_login(
        &self,
        response: reqwest::Response,
    ) -> ProviderResult<AuthSession> {
        let login_response = response.json::<LoginResponse>().await.map_err(|e| {
            ProviderError::Connection(format!("Failed to parse login response: {e}"))
        })?;

        validate_ticket(&login_response.data.ticket).map_err(|e| {
            ProviderError::Authentication(format!("Malformed ticket in login response: {e}"))
        })?;
        validate_csrf_token(&login_response.data.csrf_token).map_err(|e| {
            ProviderError::Authentication(format!("Malformed CSRF token in login response: {e}"))
        })?;

        let ticket = AuthTicket::new_unchecked(login_response.data.ticket);
        let csrf_token = CsrfToken::new_unchecked(login_response.data.csrf_token);
        Ok(AuthSession::new(ticket, Some(csrf_token)))
    }
}

impl Default for LoginService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::value_object::ApiEndpoint;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn ticket_connection(server_url: &str) -> ProxmoxConnection {
        let endpoint = ApiEndpoint::parse(server_url).unwrap();
        let credentials = Credentials::Ticket {
            username: "root".to_string(),
            password: "testpass".to_string(),
            realm: "pam".to_string(),
        };
        ProxmoxConnection::new(endpoint, credentials, false)
    }

    #[tokio::test]
    async fn login_success_yields_session() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "ticket": "PVE:root@pam:4EEC61E2::signature",
                    "CSRFPreventionToken": "4EEC61E2:abc123"
                }
            })))
            .mount(&mock_server)
            .await;

        let service = LoginService::new();
        let session = service
            .execute(&ticket_connection(&mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(
            session.ticket().as_cookie_header(),
            "PVEAuthCookie=PVE:root@pam:4EEC61E2::signature"
        );
        assert_eq!(session.csrf_token().unwrap().as_str(), "4EEC61E2:abc123");
    }

    #[tokio::test]
    async fn invalid_credentials_fail_authentication() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let service = LoginService::new();
        let result = service.execute(&ticket_connection(&mock_server.uri())).await;

        assert!(matches!(result, Err(ProviderError::Authentication(_))));
    }

    #[tokio::test]
    async fn malformed_ticket_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api2/json/access/ticket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "ticket": "not-a-ticket",
                    "CSRFPreventionToken": "4EEC61E2:abc123"
                }
            })))
            .mount(&mock_server)
            .await;

        let service = LoginService::new();
        let result = service.execute(&ticket_connection(&mock_server.uri())).await;

        assert!(matches!(result, Err(ProviderError::Authentication(_))));
    }

    #[tokio::test]
    async fn token_credentials_never_log_in() {
        let endpoint = ApiEndpoint::parse("https://pve.example.com:8006").unwrap();
        let credentials = Credentials::ApiToken {
            token_id: "automation@pve!provisioner".to_string(),
            secret: "secret".to_string(),
        };
        let connection = ProxmoxConnection::new(endpoint, credentials, false);

        let service = LoginService::new();
        let result = service.execute(&connection).await;

        assert!(matches!(result, Err(ProviderError::Authentication(_))));
    }
}
