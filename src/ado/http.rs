//! HTTP transport for the Azure DevOps REST API.
//!
//! Every request carries the session credentials and JSON content types.
//! PATCH bodies are sent as `application/json-patch+json`. Non-2xx responses
//! become [`TransportError::Status`] carrying the status, reason phrase and
//! response body text.

use async_trait::async_trait;
use reqwest::{Method, Url, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Content type for JSON request bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type required by the work item PATCH endpoint.
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// User-Agent header sent with every request.
const USER_AGENT: &str = concat!("sprintplanner/", env!("CARGO_PKG_VERSION"));

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("ADO {status} {reason}: {body}")]
    Status {
        status: u16,
        reason: String,
        body: String,
    },

    /// The request could not be sent or the response body could not be read.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The response body was not the expected JSON.
    #[error("Failed to parse ADO response: {0}")]
    Parse(String),
}

impl TransportError {
    /// HTTP status of a `Status` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// JSON-over-HTTP operations used by the fetch and mutation pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and parse the JSON body.
    async fn get_json(&self, url: Url) -> Result<Value, TransportError>;

    /// POST `body` as JSON to `url` and parse the JSON body.
    async fn post_json(&self, url: Url, body: &Value) -> Result<Value, TransportError>;

    /// PATCH `body` as a JSON-patch document to `url` and parse the JSON body.
    async fn patch_json(&self, url: Url, body: &Value) -> Result<Value, TransportError>;
}

/// Credentials attached to every request.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// No authorization header (cookies or a proxy supply identity).
    #[default]
    Anonymous,
    /// Personal access token sent as basic auth with an empty user name.
    Pat(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::Pat(_) => write!(f, "Pat(***)"),
        }
    }
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Credentials,
}

impl HttpTransport {
    /// Create a transport that attaches `credentials` to every request.
    pub fn new(credentials: Credentials) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<(&Value, &'static str)>,
    ) -> Result<Value, TransportError> {
        tracing::debug!(%method, %url, "ado request");

        let mut request = self
            .client
            .request(method, url)
            .header(header::ACCEPT, JSON_CONTENT_TYPE);

        if let Credentials::Pat(token) = &self.credentials {
            request = request.basic_auth("", Some(token));
        }

        if let Some((body, content_type)) = body {
            let bytes =
                serde_json::to_vec(body).map_err(|e| TransportError::Request(e.to_string()))?;
            request = request.header(header::CONTENT_TYPE, content_type).body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Body text is best-effort; a failed read must not mask the status.
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: Url) -> Result<Value, TransportError> {
        self.send(Method::GET, url, None).await
    }

    async fn post_json(&self, url: Url, body: &Value) -> Result<Value, TransportError> {
        self.send(Method::POST, url, Some((body, JSON_CONTENT_TYPE)))
            .await
    }

    async fn patch_json(&self, url: Url, body: &Value) -> Result<Value, TransportError> {
        self.send(Method::PATCH, url, Some((body, JSON_PATCH_CONTENT_TYPE)))
            .await
    }
}

/// Decode a JSON value into the caller's expected shape.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|e| TransportError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display_carries_body() {
        let err = TransportError::Status {
            status: 403,
            reason: "Forbidden".to_string(),
            body: "no access".to_string(),
        };
        assert_eq!(err.to_string(), "ADO 403 Forbidden: no access");
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_non_status_errors_have_no_status() {
        assert_eq!(TransportError::Parse("x".into()).status(), None);
        assert_eq!(TransportError::Request("x".into()).status(), None);
    }

    #[test]
    fn test_credentials_debug_masks_token() {
        let creds = Credentials::Pat("secret-token".to_string());
        assert_eq!(format!("{:?}", creds), "Pat(***)");
    }

    #[test]
    fn test_decode_reports_parse_error() {
        let result: Result<Vec<u64>, _> = decode(serde_json::json!({"not": "a list"}));
        assert!(matches!(result, Err(TransportError::Parse(_))));
    }
}
