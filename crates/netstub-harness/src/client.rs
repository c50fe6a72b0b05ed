//! HTTP client redirection seam
//!
//! A minimal request/response client with the calling conventions of a
//! typical promise-based HTTP library: a base URL, a JSON `data` payload, and
//! errors for any non-2xx status. Pointing it at an engine adapter routes a
//! third-party-style client through the mocks.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use netstub_core::{
    resolve::{is_absolute_url, join_url},
    AbortSignal, Headers, HttpMethod, Outcome, Response,
};

use crate::transport::{Request, Transport};

// ----------------------------------------------------------------------------
// Request / Response
// ----------------------------------------------------------------------------

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub url: String,
    pub method: Option<HttpMethod>,
    pub headers: Headers,
    pub data: Option<Value>,
    pub signal: Option<AbortSignal>,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    /// Body parsed as JSON, or the raw text as a JSON string
    pub data: Value,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed with status code {status}")]
    Status { status: u16, data: Value },
    #[error("{message}")]
    Network { message: String },
    #[error("Request aborted")]
    Aborted,
}

impl ClientError {
    /// Status of the underlying request; 0 when no response arrived
    pub fn request_status(&self) -> u16 {
        match self {
            ClientError::Status { status, .. } => *status,
            ClientError::Network { .. } | ClientError::Aborted => 0,
        }
    }

    /// Parsed body of a non-2xx response
    pub fn response_data(&self) -> Option<&Value> {
        match self {
            ClientError::Status { data, .. } => Some(data),
            ClientError::Network { .. } | ClientError::Aborted => None,
        }
    }
}

fn parse_data(response: &Response) -> Value {
    serde_json::from_str(&response.body).unwrap_or_else(|_| Value::String(response.body.clone()))
}

// ----------------------------------------------------------------------------
// HTTP Client
// ----------------------------------------------------------------------------

/// Client dispatching through a `Transport`
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    default_base: String,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("transport", &self.transport.kind())
            .field("default_base", &self.default_base)
            .finish()
    }
}

impl HttpClient {
    pub fn new<S: Into<String>>(transport: Arc<dyn Transport>, default_base: S) -> Self {
        Self {
            transport,
            default_base: default_base.into(),
        }
    }

    /// Full URL for `config`: absolute URLs pass through, others join the base
    pub fn build_url(&self, config: &ClientConfig) -> String {
        if is_absolute_url(&config.url) {
            return config.url.clone();
        }
        let base = config.base_url.as_deref().unwrap_or(&self.default_base);
        join_url(base, &config.url)
    }

    pub async fn request(&self, config: ClientConfig) -> Result<ClientResponse, ClientError> {
        let url = self.build_url(&config);
        let method = config.method.unwrap_or(HttpMethod::Get);
        debug!("Client {} {}", method, url);

        let mut request = Request::new(method, url);
        request.headers = config.headers;
        request.body = config.data;
        request.signal = config.signal;

        match self.transport.dispatch(request).await {
            Outcome::Success(response) => Ok(ClientResponse {
                data: parse_data(&response),
                status: response.status,
                status_text: response.status.to_string(),
                headers: response.headers,
            }),
            Outcome::NonSuccess(response) => Err(ClientError::Status {
                status: response.status,
                data: parse_data(&response),
            }),
            Outcome::NetworkFailure(message) => Err(ClientError::Network { message }),
            Outcome::Aborted => Err(ClientError::Aborted),
        }
    }

    pub async fn get(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(ClientConfig::new(url)).await
    }

    pub async fn post(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        self.request(ClientConfig::new(url).method(HttpMethod::Post).data(data))
            .await
    }

    pub async fn put(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        self.request(ClientConfig::new(url).method(HttpMethod::Put).data(data))
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(ClientConfig::new(url).method(HttpMethod::Delete))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::OutcomeFuture;
    use futures::FutureExt;
    use std::sync::Mutex;

    /// Replies with a canned outcome and remembers the last URL
    struct Canned {
        outcome: Outcome,
        last_url: Mutex<Option<String>>,
    }

    impl Transport for Canned {
        fn kind(&self) -> crate::transport::TransportKind {
            crate::transport::TransportKind::Promise
        }

        fn dispatch(&self, request: Request) -> OutcomeFuture {
            *self.last_url.lock().unwrap() = Some(request.url);
            futures::future::ready(self.outcome.clone()).boxed()
        }
    }

    fn canned_client(outcome: Outcome) -> (HttpClient, Arc<Canned>) {
        let canned = Arc::new(Canned {
            outcome,
            last_url: Mutex::new(None),
        });
        let client = HttpClient::new(canned.clone() as Arc<dyn Transport>, "http://localhost");
        (client, canned)
    }

    #[test]
    fn test_build_url() {
        let (client, _) = canned_client(Outcome::Aborted);
        assert_eq!(
            client.build_url(&ClientConfig::new("/api/x")),
            "http://localhost/api/x"
        );
        assert_eq!(
            client.build_url(&ClientConfig::new("HTTPS://other.test/y")),
            "HTTPS://other.test/y"
        );
        assert_eq!(
            client.build_url(&ClientConfig::new("items").base_url("http://api.test/v1/")),
            "http://api.test/v1/items"
        );
    }

    #[tokio::test]
    async fn test_text_body_falls_back_to_string() {
        let response = Response {
            status: 200,
            headers: Headers::new(),
            body: "plain".to_string(),
        };
        let (client, canned) = canned_client(Outcome::Success(response));
        let result = client.get("/text").await.unwrap();
        assert_eq!(result.data, Value::String("plain".to_string()));
        assert_eq!(result.status_text, "200");
        assert_eq!(
            canned.last_url.lock().unwrap().as_deref(),
            Some("http://localhost/text")
        );
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let response = Response::json_body(404, &serde_json::json!({"message": "nope"}));
        let (client, _) = canned_client(Outcome::NonSuccess(response));
        let err = client.get("/missing").await.unwrap_err();
        assert_eq!(err.to_string(), "Request failed with status code 404");
        assert_eq!(err.request_status(), 404);
        assert_eq!(err.response_data().unwrap()["message"], "nope");

        let (client, _) = network_client();
        let err = client.get("/down").await.unwrap_err();
        assert_eq!(err.request_status(), 0);
        assert_eq!(err.to_string(), "Network Error");
    }

    fn network_client() -> (HttpClient, Arc<Canned>) {
        canned_client(Outcome::NetworkFailure("Network Error".to_string()))
    }
}
