//! Shared network state
//!
//! `NetworkState` is the single mutable unit behind every engine facade and
//! both transport adapters. It owns the route table, the ledger, the activity
//! tracker and the event bus, and runs the common request pipeline:
//! match, begin activity, record, emit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::activity::{ActivityGuard, ActivityTracker};
use crate::config::EngineConfig;
use crate::event_bus::{EventBus, NetworkEvent};
use crate::ledger::RequestLedger;
use crate::resolve::{origin_of, parse_against};
use crate::route::{MockBody, Route, RouteMatch, RouteTable};
use crate::types::{
    normalize_recorded_path, AbortRecord, CallRecord, Headers, HttpMethod, QueryParams, RouteId,
    Timestamp,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Dispatch Result
// ----------------------------------------------------------------------------

/// What the pipeline decided for one call
#[derive(Debug)]
pub struct Dispatch {
    /// Normalised path: the route path when matched, the caller path otherwise
    pub path: String,
    /// Ledger entry, absent for unmatched relative URLs
    pub record: Option<CallRecord>,
    /// The answering route, `None` for unmatched calls
    pub route: Option<RouteMatch>,
    /// Activity held by matched calls until they settle
    pub activity: Option<ActivityGuard>,
}

impl Dispatch {
    pub fn is_matched(&self) -> bool {
        self.route.is_some()
    }
}

// ----------------------------------------------------------------------------
// Network State
// ----------------------------------------------------------------------------

struct SharedState {
    id: Uuid,
    config: Mutex<EngineConfig>,
    routes: Mutex<RouteTable>,
    ledger: Mutex<RequestLedger>,
    tracker: ActivityTracker,
    bus: EventBus,
}

/// Clone-able handle; clones observe and mutate the same state
#[derive(Clone)]
pub struct NetworkState {
    shared: Arc<SharedState>,
}

impl std::fmt::Debug for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkState")
            .field("id", &self.shared.id)
            .field("active", &self.shared.tracker.active_count())
            .finish()
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl NetworkState {
    pub fn new(config: EngineConfig) -> Self {
        let tracker = ActivityTracker::new(config.idle_failsafe());
        let id = Uuid::new_v4();
        debug!("Creating network state {}", id);
        Self {
            shared: Arc::new(SharedState {
                id,
                config: Mutex::new(config),
                routes: Mutex::new(RouteTable::new()),
                ledger: Mutex::new(RequestLedger::new()),
                tracker,
                bus: EventBus::new(),
            }),
        }
    }

    /// Namespace id distinguishing independent states in logs
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// True when both handles point at the same state
    pub fn same_as(&self, other: &NetworkState) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn config(&self) -> EngineConfig {
        lock(&self.shared.config).clone()
    }

    pub fn set_config(&self, config: EngineConfig) {
        self.shared.tracker.set_failsafe(config.idle_failsafe());
        *lock(&self.shared.config) = config;
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.shared.tracker
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    // ------------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------------

    pub fn register(
        &self,
        method: HttpMethod,
        pattern: &str,
        body: MockBody,
        status: u16,
        uses: u32,
    ) -> RouteId {
        lock(&self.shared.routes).register(method, pattern, body, status, uses)
    }

    pub fn routes(&self) -> Vec<Route> {
        lock(&self.shared.routes).routes()
    }

    pub fn pending_routes(&self) -> Vec<Route> {
        lock(&self.shared.routes).pending()
    }

    // ------------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------------

    pub fn calls(&self, method: Option<HttpMethod>, path: Option<&str>) -> Vec<CallRecord> {
        lock(&self.shared.ledger).calls(method, path)
    }

    pub fn aborts(&self, method: Option<HttpMethod>, path: Option<&str>) -> Vec<AbortRecord> {
        lock(&self.shared.ledger).aborts(method, path)
    }

    // ------------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------------

    /// Match, begin activity, record and emit `call` for one request
    ///
    /// Unmatched calls are only recorded when the caller URL is absolute, as
    /// a relative URL carries no origin to attribute the traffic to.
    pub fn resolve(
        &self,
        method: HttpMethod,
        url: &str,
        headers: Headers,
        body: Option<Value>,
    ) -> Dispatch {
        let base = lock(&self.shared.config).base_url.clone();
        let route = lock(&self.shared.routes).match_and_claim(method, url, &base);
        let activity = route.as_ref().map(|_| self.shared.tracker.begin_guarded());

        let resolved = parse_against(url, &base);
        let caller_path = resolved
            .as_ref()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| url.to_string());
        let recordable = route.is_some() || Url::parse(url).is_ok();
        let path = normalize_recorded_path(
            route.as_ref().map_or(caller_path.as_str(), |m| m.stub_path.as_str()),
        );

        match &activity {
            Some(guard) => debug!(
                "[{}] {} {} matched as {} ({})",
                self.shared.id,
                method,
                url,
                path,
                guard.id()
            ),
            None => debug!("[{}] {} {} unmatched", self.shared.id, method, url),
        }

        let record = resolved.filter(|_| recordable).map(|caller| CallRecord {
            method,
            path: path.clone(),
            base: origin_of(&caller),
            mount: route.as_ref().map(|m| m.mount.clone()).unwrap_or_default(),
            query: QueryParams::from_pairs(
                caller
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            ),
            headers,
            body,
            timestamp: Timestamp::now(),
            matched: route.is_some(),
        });

        if let Some(record) = &record {
            lock(&self.shared.ledger).record_call(record.clone());
            self.shared.bus.emit(&NetworkEvent::Call(record.clone()));
        }

        Dispatch {
            path,
            record,
            route,
            activity,
        }
    }

    /// Append an abort record and emit `abort`
    pub fn record_abort(&self, method: HttpMethod, path: &str) {
        let record = AbortRecord {
            method,
            path: normalize_recorded_path(path),
            timestamp: Timestamp::now(),
        };
        debug!("[{}] Abort {} {}", self.shared.id, method, record.path);
        lock(&self.shared.ledger).record_abort(record.clone());
        self.shared.bus.emit(&NetworkEvent::Abort(record));
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Drop routes and records, force the tracker idle and restart ids
    pub fn clear(&self) {
        lock(&self.shared.routes).clear();
        lock(&self.shared.ledger).clear();
        self.shared.tracker.reset();
        debug!("[{}] Cleared network state", self.shared.id);
    }

    pub async fn wait_for_idle(&self) {
        self.shared.tracker.wait_idle().await;
    }
}
