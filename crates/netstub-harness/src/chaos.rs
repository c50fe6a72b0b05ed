//! Fault injection helpers
//!
//! Each helper registers a one-shot GET route that fails in a particular way.

use serde_json::{json, Value};

use netstub_core::{HttpMethod, RouteId, NETWORK_FAILURE_STATUS};

use crate::engine::Engine;

/// Fault injection for one engine
#[derive(Debug, Clone, Copy)]
pub struct Chaos<'a> {
    engine: &'a Engine,
}

impl<'a> Chaos<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    fn fail(&self, path: &str, status: u16, body: Value) -> RouteId {
        self.engine
            .route(HttpMethod::Get, path)
            .status(status)
            .times(1)
            .reply(body)
    }

    /// 429 Too Many Requests
    pub fn rate_limit(&self, path: &str) -> RouteId {
        self.fail(path, 429, json!({ "message": "Too many requests" }))
    }

    /// 500 Internal Server Error
    pub fn server_error(&self, path: &str) -> RouteId {
        self.fail(path, 500, json!({ "message": "Server error" }))
    }

    /// 408 Request Timeout
    pub fn timeout(&self, path: &str) -> RouteId {
        self.fail(path, 408, json!({ "message": "Request timeout" }))
    }

    /// Connection-level failure with no response at all
    pub fn network_error(&self, path: &str) -> RouteId {
        self.fail(path, NETWORK_FAILURE_STATUS, Value::Null)
    }
}
