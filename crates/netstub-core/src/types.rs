//! Core types for the netstub engine
//!
//! Request identifiers, HTTP methods, timestamps and the immutable records
//! appended to the request ledger.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{NetstubError, TransportError};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Identifier of an in-flight request, allocated by the activity tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration sequence number of a route, unique per table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteId(usize);

impl RouteId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

// ----------------------------------------------------------------------------
// HTTP Method
// ----------------------------------------------------------------------------

/// HTTP methods understood by the route table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = NetstubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(NetstubError::invalid_method(s)),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Request Metadata
// ----------------------------------------------------------------------------

/// Header map as recorded from the caller
pub type Headers = BTreeMap<String, String>;

/// Query parameters of a recorded call, preserving repeated keys in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    /// Collect `(key, value)` pairs; returns `None` when there are none
    pub fn from_pairs<I, K, V>(pairs: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            map.entry(key.into()).or_default().push(value.into());
        }
        if map.is_empty() {
            None
        } else {
            Some(Self(map))
        }
    }

    /// First value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Every value recorded for `key`
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Ledger Records
// ----------------------------------------------------------------------------

/// A call observed by the engine, matched or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub method: HttpMethod,
    /// Route path for matched calls, caller path otherwise; no trailing slash
    pub path: String,
    /// Origin of the caller URL
    pub base: String,
    /// Caller path prefix in front of the matched route path
    pub mount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryParams>,
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub timestamp: Timestamp,
    pub matched: bool,
}

/// A matched call cancelled before it completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortRecord {
    pub method: HttpMethod,
    pub path: String,
    pub timestamp: Timestamp,
}

/// Strip a single trailing `/` the way recorded paths are normalised
pub fn normalize_recorded_path(path: &str) -> String {
    path.strip_suffix('/').unwrap_or(path).to_string()
}

/// Prefix a leading `/` onto paths passed to inspection helpers
pub fn normalize_query_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// A simulated HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    /// Response with a JSON body and the JSON content type
    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: body.to_string(),
        }
    }

    /// The neutral response handed to unmatched calls
    pub fn neutral() -> Self {
        Self::json_body(200, &serde_json::json!({ "data": {} }))
    }

    /// True for 2xx statuses
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetstubError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// How a dispatched request settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Response),
    NonSuccess(Response),
    NetworkFailure(String),
    Aborted,
}

impl Outcome {
    /// Classify a fetch-style result
    pub fn from_result(result: Result<Response, TransportError>) -> Self {
        match result {
            Ok(response) if response.ok() => Outcome::Success(response),
            Ok(response) => Outcome::NonSuccess(response),
            Err(TransportError::Aborted { .. }) => Outcome::Aborted,
            Err(err) => Outcome::NetworkFailure(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Success(response) | Outcome::NonSuccess(response) => Some(response),
            Outcome::NetworkFailure(_) | Outcome::Aborted => None,
        }
    }
}
