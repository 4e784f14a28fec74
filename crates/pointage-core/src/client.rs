//! HTTP client for the remote clocking API.
//!
//! Two endpoints are used:
//!
//! - `POST {auth_base_url}/api/login` with `{ email, password }`, answering
//!   `{ token, type }`
//! - `POST {base_url}/api/admin/clocking` with
//!   `{ matricule, conducteur_matricule, type }` and a bearer token
//!
//! Submissions never fail with an error value: any non-2xx status or transport
//! problem becomes a [`SubmissionOutcome::Failure`] carrying the server's
//! `message` when there is one. There is no retry; the operator restarts the
//! scan instead.

use std::future::Future;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::session::Session;
use crate::types::PointageType;

/// Path of the clocking endpoint, relative to the API base URL.
pub const CLOCKING_PATH: &str = "api/admin/clocking";

/// Path of the login endpoint, relative to the auth base URL.
pub const LOGIN_PATH: &str = "api/login";

/// Message used when a failed submission carries no server message.
pub const SUBMISSION_FALLBACK_MESSAGE: &str = "Failed to send clocking data to the server";

/// Message used when a successful submission carries no server message.
pub const SUBMISSION_SUCCESS_MESSAGE: &str = "Clocking data recorded successfully";

/// Message used when a failed login carries no server message.
pub const LOGIN_FALLBACK_MESSAGE: &str = "Login failed";

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

/// Errors raised by [`ClockingClient`] outside of submissions.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The email does not look like an address.
    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    /// The login endpoint answered with an error.
    #[error("{0}")]
    LoginRejected(String),

    /// A submission was requested without both codes.
    #[error("both the bus code and the driver code are required")]
    MissingCodes,

    /// An endpoint URL could not be built.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Check an email address before sending it to the login endpoint.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email.trim())
}

/// Everything needed for one clocking submission.
#[derive(Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Bus code.
    pub bus_code: String,
    /// Driver code.
    pub driver_code: String,
    /// Entry, exit or category.
    pub pointage_type: PointageType,
    /// Bearer token, possibly empty.
    pub token: String,
}

impl SubmissionRequest {
    /// Build a request, trimming codes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingCodes`] if either code is blank.
    pub fn new(
        bus_code: &str,
        driver_code: &str,
        session: &Session,
    ) -> Result<Self, ClientError> {
        let bus_code = bus_code.trim();
        let driver_code = driver_code.trim();
        if bus_code.is_empty() || driver_code.is_empty() {
            return Err(ClientError::MissingCodes);
        }
        Ok(Self {
            bus_code: bus_code.to_string(),
            driver_code: driver_code.to_string(),
            pointage_type: session.pointage_type,
            token: session.token.clone(),
        })
    }

    fn body(&self) -> ClockingBody<'_> {
        ClockingBody {
            matricule: &self.bus_code,
            conducteur_matricule: &self.driver_code,
            kind: self.pointage_type.as_wire(),
        }
    }
}

impl std::fmt::Debug for SubmissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRequest")
            .field("bus_code", &self.bus_code)
            .field("driver_code", &self.driver_code)
            .field("pointage_type", &self.pointage_type)
            .finish_non_exhaustive()
    }
}

/// Whether the server accepted the clocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionOutcome {
    /// 2xx response.
    Success,
    /// Non-2xx response or transport error.
    Failure,
}

/// Result of one submission, folded into the scan state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Success or failure.
    pub outcome: SubmissionOutcome,
    /// Server message, or a fallback text.
    pub server_message: String,
    /// Bus name resolved by the server.
    pub resolved_bus_name: Option<String>,
    /// Driver name resolved by the server.
    pub resolved_driver_name: Option<String>,
}

impl SubmissionResult {
    /// A success with no resolved names.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            outcome: SubmissionOutcome::Success,
            server_message: message.into(),
            resolved_bus_name: None,
            resolved_driver_name: None,
        }
    }

    /// A failure with the given message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: SubmissionOutcome::Failure,
            server_message: message.into(),
            resolved_bus_name: None,
            resolved_driver_name: None,
        }
    }

    /// Attach names resolved by the server.
    #[must_use]
    pub fn with_names(mut self, bus: Option<String>, driver: Option<String>) -> Self {
        self.resolved_bus_name = bus;
        self.resolved_driver_name = driver;
        self
    }

    /// `true` for [`SubmissionOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == SubmissionOutcome::Success
    }
}

/// Sends clocking submissions.
///
/// Implemented by [`ClockingClient`] and by test fakes.
pub trait Submitter {
    /// Perform one submission. Never retries.
    fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> impl Future<Output = SubmissionResult> + Send;
}

#[derive(Serialize)]
struct ClockingBody<'a> {
    matricule: &'a str,
    conducteur_matricule: &'a str,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "type", default)]
    kind: Option<serde_json::Value>,
}

/// Body of a clocking response. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClockingResponse {
    message: Option<String>,
    data: Option<ClockingData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClockingData {
    bus: Option<NamedEntity>,
    #[serde(alias = "driver", alias = "chauffeur")]
    conducteur: Option<NamedEntity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedEntity {
    #[serde(alias = "nom")]
    name: Option<String>,
    matricule: Option<String>,
}

impl NamedEntity {
    fn display_name(self) -> Option<String> {
        self.name.or(self.matricule).filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageBody {
    message: Option<String>,
}

/// Extract a non-empty `message` field from a JSON body.
fn message_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<MessageBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
}

/// Map an HTTP status and body to a [`SubmissionResult`].
fn interpret_clocking_response(status: StatusCode, body: &str) -> SubmissionResult {
    if !status.is_success() {
        let message =
            message_from_body(body).unwrap_or_else(|| SUBMISSION_FALLBACK_MESSAGE.to_string());
        return SubmissionResult::failure(message);
    }

    let parsed: ClockingResponse = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| SUBMISSION_SUCCESS_MESSAGE.to_string());
    let (bus, driver) = parsed.data.map_or((None, None), |data| {
        (
            data.bus.and_then(NamedEntity::display_name),
            data.conducteur.and_then(NamedEntity::display_name),
        )
    });
    SubmissionResult::success(message).with_names(bus, driver)
}

/// Join a relative endpoint path onto a base URL, keeping any base path.
fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
}

/// HTTP client for login and clocking.
#[derive(Clone)]
pub struct ClockingClient {
    client: reqwest::Client,
    clocking_url: Url,
    login_url: Url,
}

impl ClockingClient {
    /// Build a client from API settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs cannot be built or the HTTP
    /// client cannot be initialized.
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            clocking_url: endpoint(&config.base_url, CLOCKING_PATH)?,
            login_url: endpoint(config.auth_url(), LOGIN_PATH)?,
        })
    }

    /// Clocking endpoint in use.
    #[must_use]
    pub const fn clocking_url(&self) -> &Url {
        &self.clocking_url
    }

    /// Login endpoint in use.
    #[must_use]
    pub const fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Exchange credentials for a session.
    ///
    /// The `type` returned by the server seeds the session's pointage type
    /// when it can be parsed; otherwise the session starts as entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEmail`] before any request if the email is
    /// malformed, [`ClientError::LoginRejected`] with the server message on a
    /// non-2xx answer, or a transport error.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(ClientError::InvalidEmail(email.to_string()));
        }

        debug!(url = %self.login_url, "sending login request");
        let resp = self
            .client
            .post(self.login_url.clone())
            .json(&LoginBody { email, password })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message =
                message_from_body(&body).unwrap_or_else(|| LOGIN_FALLBACK_MESSAGE.to_string());
            warn!(%status, "login rejected");
            return Err(ClientError::LoginRejected(message));
        }

        let login: LoginResponse = resp.json().await?;
        let pointage_type = login
            .kind
            .as_ref()
            .and_then(|value| match value {
                serde_json::Value::String(s) => s.parse().ok(),
                serde_json::Value::Number(n) => n.to_string().parse().ok(),
                _ => None,
            })
            .unwrap_or_default();

        info!(%pointage_type, "login succeeded");
        Ok(Session::new(login.token, pointage_type))
    }
}

impl Submitter for ClockingClient {
    async fn submit(&self, request: &SubmissionRequest) -> SubmissionResult {
        debug!(
            url = %self.clocking_url,
            bus = %request.bus_code,
            driver = %request.driver_code,
            "sending clocking"
        );

        let sent = self
            .client
            .post(self.clocking_url.clone())
            .bearer_auth(&request.token)
            .json(&request.body())
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "clocking request failed");
                return SubmissionResult::failure(SUBMISSION_FALLBACK_MESSAGE);
            }
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, %status, "failed to read clocking response");
                String::new()
            }
        };

        let result = interpret_clocking_response(status, &body);
        if result.is_success() {
            info!(%status, bus = %request.bus_code, driver = %request.driver_code, "clocking recorded");
        } else {
            warn!(%status, message = %result.server_message, "clocking rejected");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("tok", PointageType::Exit)
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("agent@dnk.dz"));
        assert!(is_valid_email("  agent@dnk.dz "));
        assert!(!is_valid_email("agent"));
        assert!(!is_valid_email("agent@dnk"));
        assert!(!is_valid_email("a b@dnk.dz"));
    }

    #[test]
    fn test_request_requires_both_codes() {
        assert!(matches!(
            SubmissionRequest::new("BUS1", "  ", &session()),
            Err(ClientError::MissingCodes)
        ));
        assert!(matches!(
            SubmissionRequest::new("", "DRV1", &session()),
            Err(ClientError::MissingCodes)
        ));
        let req = SubmissionRequest::new(" BUS1 ", "DRV1\n", &session()).unwrap();
        assert_eq!(req.bus_code, "BUS1");
        assert_eq!(req.driver_code, "DRV1");
        assert_eq!(req.pointage_type, PointageType::Exit);
    }

    #[test]
    fn test_request_body_shape() {
        let req = SubmissionRequest::new("BUS123", "DRV42", &session()).unwrap();
        let json = serde_json::to_value(req.body()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "matricule": "BUS123",
                "conducteur_matricule": "DRV42",
                "type": "exit"
            })
        );
    }

    #[test]
    fn test_request_debug_hides_token() {
        let req = SubmissionRequest::new("BUS123", "DRV42", &session()).unwrap();
        assert!(!format!("{req:?}").contains("tok"));
    }

    #[test]
    fn test_failure_uses_server_message_verbatim() {
        let result = interpret_clocking_response(
            StatusCode::BAD_REQUEST,
            r#"{"message":"duplicate entry"}"#,
        );
        assert_eq!(result.outcome, SubmissionOutcome::Failure);
        assert_eq!(result.server_message, "duplicate entry");
    }

    #[test]
    fn test_failure_without_message_uses_fallback() {
        for body in ["", "<html>502</html>", r#"{"error":"x"}"#, r#"{"message":""}"#] {
            let result = interpret_clocking_response(StatusCode::BAD_GATEWAY, body);
            assert_eq!(result.server_message, SUBMISSION_FALLBACK_MESSAGE);
        }
    }

    #[test]
    fn test_success_with_resolved_names() {
        let body = r#"{
            "message": "OK",
            "data": {
                "bus": { "matricule": "BUS123", "nom": "Bus 12 - Ligne A" },
                "conducteur": { "name": "Karim B." }
            }
        }"#;
        let result = interpret_clocking_response(StatusCode::CREATED, body);
        assert!(result.is_success());
        assert_eq!(result.server_message, "OK");
        assert_eq!(result.resolved_bus_name.as_deref(), Some("Bus 12 - Ligne A"));
        assert_eq!(result.resolved_driver_name.as_deref(), Some("Karim B."));
    }

    #[test]
    fn test_success_without_body() {
        let result = interpret_clocking_response(StatusCode::OK, "");
        assert!(result.is_success());
        assert_eq!(result.server_message, SUBMISSION_SUCCESS_MESSAGE);
        assert!(result.resolved_bus_name.is_none());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("https://api.example.com/v2").unwrap();
        assert_eq!(
            endpoint(&base, CLOCKING_PATH).unwrap().as_str(),
            "https://api.example.com/v2/api/admin/clocking"
        );
        let root = Url::parse("https://api.example.com").unwrap();
        assert_eq!(
            endpoint(&root, LOGIN_PATH).unwrap().as_str(),
            "https://api.example.com/api/login"
        );
    }

    #[tokio::test]
    async fn test_login_rejects_bad_email_without_request() {
        let client = ClockingClient::new(&ApiConfig::default()).unwrap();
        let err = client.login("not-an-email", "pw").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidEmail(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_failure() {
        let config = ApiConfig {
            base_url: Url::parse("http://127.0.0.1:9").unwrap(),
            auth_base_url: None,
            timeout_secs: 2,
        };
        let client = ClockingClient::new(&config).unwrap();
        let req = SubmissionRequest::new("BUS1", "DRV1", &session()).unwrap();
        let result = client.submit(&req).await;
        assert_eq!(result.outcome, SubmissionOutcome::Failure);
        assert_eq!(result.server_message, SUBMISSION_FALLBACK_MESSAGE);
    }
}
