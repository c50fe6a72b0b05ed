//! netstub harness
//!
//! Intercepting transports and the `Engine` facade for deterministic network
//! simulation in tests.
//!
//! # Overview
//!
//! - **Two transport shapes**: a callback request object with a ready-state
//!   machine and a future-returning fetch call, both resolved against the same
//!   route table
//! - **Redirection**: code under test reads transports from `TransportSlots`;
//!   `Engine::install` swaps the mocks in and `uninstall` restores the originals
//! - **Fault injection**: rate limits, server errors, timeouts, network errors
//!   and hanging routes
//! - **Assertions**: polling expectations on calls and aborts, and a teardown
//!   check for routes that were never used
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use netstub_harness::{Engine, EngineConfig, FetchRequest, HttpMethod};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn loads_users() {
//!     let engine = Engine::new(EngineConfig::instant());
//!     engine.install();
//!     engine.on_get("/api/users", json!([{ "id": 1 }]));
//!
//!     let response = engine
//!         .promise_transport()
//!         .fetch(FetchRequest::new("/api/users"))
//!         .await
//!         .unwrap();
//!     assert_eq!(response.status, 200);
//!
//!     engine.expect_called_times(HttpMethod::Get, "/api/users", 1).await.unwrap();
//!     engine.expect_no_pending().await.unwrap();
//! }
//! ```

pub mod assertions;
pub mod callback_transport;
pub mod chaos;
pub mod client;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod promise_transport;
pub mod transport;

pub use callback_transport::{CallbackRequest, CallbackTransport, ReadyState, RequestHandler};
pub use chaos::Chaos;
pub use client::{ClientConfig, ClientError, ClientResponse, HttpClient};
pub use engine::{Engine, RouteBuilder};
pub use lifecycle::{InstallGuard, TestLifecycle};
pub use logging::init_logging;
pub use promise_transport::{FetchRequest, PromiseTransport, ResponseFuture};
pub use transport::{OutcomeFuture, Request, Transport, TransportKind, TransportSlots};

pub use netstub_core::{
    AbortController, AbortRecord, AbortSignal, AssertionError, CallRecord, Deferred,
    DeferredResolver, EngineConfig, HttpMethod, MockBody, NetstubError, NetstubResult,
    NetworkState, Outcome, Response, Route, RouteId, TransportError,
};
