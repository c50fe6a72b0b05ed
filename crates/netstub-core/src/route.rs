//! Mock route table
//!
//! Routes are matched newest-first. A successful match claims one use of the
//! winning route; exhausted routes stay in the table so they can be inspected.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::deferred::Deferred;
use crate::resolve::{is_absolute_url, join_url, parse_against};
use crate::types::{HttpMethod, RouteId};

/// Status code that makes a matched route fail at the network level
pub const NETWORK_FAILURE_STATUS: u16 = 0;

// ----------------------------------------------------------------------------
// Route Definition
// ----------------------------------------------------------------------------

/// Body a route answers with
#[derive(Debug, Clone)]
pub enum MockBody {
    Value(Value),
    Deferred(Deferred),
}

impl From<Value> for MockBody {
    fn from(value: Value) -> Self {
        MockBody::Value(value)
    }
}

impl From<Deferred> for MockBody {
    fn from(deferred: Deferred) -> Self {
        MockBody::Deferred(deferred)
    }
}

/// A registered mock
#[derive(Debug, Clone)]
pub struct Route {
    pub id: RouteId,
    pub method: HttpMethod,
    /// Pattern as registered, relative or absolute
    pub pattern: String,
    pub is_absolute: bool,
    pub status: u16,
    pub body: MockBody,
    pub remaining_uses: u32,
}

impl Route {
    pub fn is_pending(&self) -> bool {
        self.remaining_uses > 0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

/// The route that answered a call
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route_id: RouteId,
    pub status: u16,
    pub body: MockBody,
    /// Path of the route pattern after resolution
    pub stub_path: String,
    /// Caller path prefix in front of `stub_path`
    pub mount: String,
}

// ----------------------------------------------------------------------------
// Route Table
// ----------------------------------------------------------------------------

/// Ordered collection of routes
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    /// Never rewound, so ids stay unique across `clear`
    next_id: usize,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route; later routes take precedence
    pub fn register<S: Into<String>>(
        &mut self,
        method: HttpMethod,
        pattern: S,
        body: MockBody,
        status: u16,
        uses: u32,
    ) -> RouteId {
        let pattern = pattern.into();
        let id = RouteId::new(self.next_id);
        self.next_id += 1;
        debug!("Registering {} {} -> {} ({} uses)", method, pattern, status, uses);
        self.routes.push(Route {
            id,
            method,
            is_absolute: is_absolute_url(&pattern),
            pattern,
            status,
            body,
            remaining_uses: uses,
        });
        id
    }

    /// Find the newest usable route for the call and claim one of its uses
    pub fn match_and_claim(
        &mut self,
        method: HttpMethod,
        caller_url: &str,
        base: &str,
    ) -> Option<RouteMatch> {
        let caller = parse_against(caller_url, base)?;

        for route in self.routes.iter_mut().rev() {
            if route.method != method || route.remaining_uses == 0 {
                continue;
            }

            let matched = if route.is_absolute {
                match_absolute(route, caller_url, &caller)
            } else {
                match_relative(route, &caller, base)
            };

            if let Some((stub_path, mount)) = matched {
                route.remaining_uses -= 1;
                debug!(
                    "Matched {} {} to route {} ({} uses left)",
                    method,
                    caller_url,
                    route.pattern,
                    route.remaining_uses
                );
                return Some(RouteMatch {
                    route_id: route.id,
                    status: route.status,
                    body: route.body.clone(),
                    stub_path,
                    mount,
                });
            }
        }

        None
    }

    /// Routes with uses remaining, in registration order
    pub fn pending(&self) -> Vec<Route> {
        self.routes.iter().filter(|r| r.is_pending()).cloned().collect()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.clone()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

fn match_absolute(route: &Route, caller_url: &str, caller: &Url) -> Option<(String, String)> {
    if route.pattern == caller_url {
        Some((caller.path().to_string(), String::new()))
    } else {
        None
    }
}

fn match_relative(route: &Route, caller: &Url, base: &str) -> Option<(String, String)> {
    let stub = Url::parse(&join_url(base, &route.pattern)).ok()?;
    let stub_path = stub.path();
    let actual = caller.path();

    if !actual.ends_with(stub_path) {
        return None;
    }

    if stub.query().is_some_and(|q| !q.is_empty()) && !query_satisfied(&stub, caller) {
        return None;
    }

    let mount = actual[..actual.len() - stub_path.len()].to_string();
    Some((stub_path.to_string(), mount))
}

/// Every pattern key (case-insensitive) needs an equal value among the caller's
fn query_satisfied(stub: &Url, caller: &Url) -> bool {
    let mut actual: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in caller.query_pairs() {
        actual
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }

    stub.query_pairs().all(|(key, value)| {
        actual
            .get(&key.to_lowercase())
            .is_some_and(|values| values.iter().any(|v| *v == value))
    })
}
