//! Transport to the remote authorization API.
//!
//! The client talks to the API through [`AuthzTransport`], so tests can swap
//! the HTTP stack for an in-process fake. [`HttpTransport`] is the `reqwest`
//! implementation used in production.

use crate::config::AuthzConfig;
use crate::error::AuthzError;
use async_trait::async_trait;
use rootcause::Report;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::debug;

/// HTTP method of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
            Self::Put => f.write_str("PUT"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// A request to the authorization API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, e.g. `/authz/objects/{id}`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// A GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// A POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// A PUT request with a JSON body.
    #[must_use]
    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    /// A DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Appends query parameters.
    #[must_use]
    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Value of the first query parameter named `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the authorization API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body.
    pub body: String,
}

impl ApiResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 response carrying `value` as JSON.
    #[must_use]
    pub fn json_ok<T: serde::Serialize>(value: &T) -> Self {
        Self::new(200, serde_json::to_string(value).unwrap_or_default())
    }

    /// True for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Report<AuthzError>> {
        serde_json::from_str(&self.body).map_err(|e| {
            AuthzError::InvalidResponse {
                details: e.to_string(),
            }
            .into()
        })
    }
}

/// Sends requests to the authorization API.
///
/// Implementations return every response the server produced, whatever its
/// status, and only fail when no response was received.
#[async_trait]
pub trait AuthzTransport: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Report<AuthzError>>;
}

/// [`AuthzTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    /// Creates a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AuthzConfig) -> Result<Self, Report<AuthzError>> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AuthzError::Configuration {
                details: format!("HTTP client error: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl AuthzTransport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Report<AuthzError>> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(method, &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AuthzError::ConnectionFailed {
                details: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthzError::ConnectionFailed {
                details: e.to_string(),
            })?;
        debug!(method = %request.method, path = %request.path, status, "authz request");
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders() {
        let request = ApiRequest::get("/authz/edges")
            .with_query([("source_object_id", "a"), ("target_object_id", "b")]);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_param("target_object_id"), Some("b"));
        assert_eq!(request.query_param("edge_type_id"), None);

        let request = ApiRequest::post("/authz/objects", serde_json::json!({"object": {}}));
        assert!(request.body.is_some());
    }

    #[test]
    fn response_decoding() {
        let ok = ApiResponse::new(201, r#"{"a":1}"#);
        assert!(ok.is_success());
        let value: serde_json::Value = ok.json().unwrap();
        assert_eq!(value["a"], 1);

        let bad = ApiResponse::new(200, "not json");
        let err = bad.json::<serde_json::Value>().expect_err("invalid body");
        assert!(matches!(err.current_context(), AuthzError::InvalidResponse { .. }));
        assert!(!ApiResponse::new(404, "").is_success());
    }

    #[test]
    fn http_transport_trims_base_url() {
        let config = AuthzConfig {
            base_url: "http://localhost:5000/".to_string(),
            ..AuthzConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.base_url, "http://localhost:5000");
    }
}
