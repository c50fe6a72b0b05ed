//! netstub core
//!
//! Deterministic building blocks for simulating an HTTP network in tests: an
//! ordered table of mock routes, an append-only request ledger, in-flight
//! activity tracking, a lifecycle event bus, and the shared state that ties
//! them into one request pipeline. No real I/O is ever performed.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod activity;
pub mod config;
pub mod deferred;
pub mod errors;
pub mod event_bus;
pub mod ledger;
pub mod resolve;
pub mod route;
pub mod signal;
pub mod state;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use activity::{ActivityGuard, ActivityTracker};
pub use config::{EngineConfig, DEFAULT_BASE_URL};
pub use deferred::{Deferred, DeferredResolver, DeferredResult};
pub use errors::{AssertionError, ConfigError, NetstubError, NetstubResult, Result, TransportError};
pub use event_bus::{EventBus, EventKind, EventWaiter, NetworkEvent, SubscriptionId};
pub use ledger::RequestLedger;
pub use route::{MockBody, Route, RouteMatch, RouteTable, NETWORK_FAILURE_STATUS};
pub use signal::{AbortController, AbortSignal};
pub use state::{Dispatch, NetworkState};
pub use types::{
    AbortRecord, CallRecord, Headers, HttpMethod, Outcome, QueryParams, RequestId, Response,
    RouteId, Timestamp,
};
