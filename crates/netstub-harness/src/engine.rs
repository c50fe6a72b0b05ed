//! Engine facade
//!
//! `Engine` is the handle tests hold: it registers routes, installs the
//! intercepting adapters into the transport slots, and exposes the ledger for
//! inspection. Clones and `attach`ed facades share one network state.

use std::sync::Arc;

use tracing::{debug, info};

use netstub_core::{
    types::normalize_query_path, AbortRecord, CallRecord, Deferred, EngineConfig, HttpMethod,
    MockBody, NetstubResult, NetworkState, Route, RouteId,
};

use crate::callback_transport::CallbackTransport;
use crate::chaos::Chaos;
use crate::client::HttpClient;
use crate::lifecycle::InstallGuard;
use crate::promise_transport::PromiseTransport;
use crate::transport::{Transport, TransportSlots};

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Facade over one shared network state
#[derive(Debug, Clone)]
pub struct Engine {
    network: NetworkState,
    slots: TransportSlots,
    callback: Arc<CallbackTransport>,
    promise: Arc<PromiseTransport>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Engine over a fresh state and empty transport slots
    pub fn new(config: EngineConfig) -> Self {
        Self::with_slots(config, TransportSlots::new())
    }

    /// Engine over a fresh state that installs into existing `slots`
    pub fn with_slots(config: EngineConfig, slots: TransportSlots) -> Self {
        Self::from_state(NetworkState::new(config), slots)
    }

    /// Another facade over an existing state
    pub fn from_state(network: NetworkState, slots: TransportSlots) -> Self {
        Self {
            callback: Arc::new(CallbackTransport::new(network.clone())),
            promise: Arc::new(PromiseTransport::new(network.clone())),
            network,
            slots,
        }
    }

    /// Engine configured from `netstub.toml` and `NETSTUB_*` variables
    pub fn load() -> NetstubResult<Self> {
        Ok(Self::new(EngineConfig::load()?))
    }

    /// A facade sharing this engine's state and slots
    pub fn attach(&self) -> Self {
        Self::from_state(self.network.clone(), self.slots.clone())
    }

    pub fn state(&self) -> &NetworkState {
        &self.network
    }

    pub fn slots(&self) -> &TransportSlots {
        &self.slots
    }

    pub fn config(&self) -> EngineConfig {
        self.network.config()
    }

    pub fn set_config(&self, config: EngineConfig) {
        self.network.set_config(config);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Swap the adapters into the slots and start from a clean state
    ///
    /// Originals are snapshotted only on the first install.
    pub fn install(&self) {
        self.network.clear();
        let adapters: Vec<Arc<dyn Transport>> = vec![
            Arc::clone(&self.callback) as Arc<dyn Transport>,
            Arc::clone(&self.promise) as Arc<dyn Transport>,
        ];
        let first = self.slots.install(self.network.id(), adapters);
        info!(
            "Installed netstub engine {} ({})",
            self.network.id(),
            if first { "fresh" } else { "reinstalled" }
        );
    }

    /// Install and uninstall again when the guard drops
    pub fn install_scoped(&self) -> InstallGuard {
        self.install();
        InstallGuard::new(self.clone())
    }

    /// Restore the transports that were in the slots before `install`
    ///
    /// No effect when another engine owns the slots.
    pub fn uninstall(&self) -> bool {
        let restored = self.slots.uninstall(self.network.id());
        if restored {
            info!("Uninstalled netstub engine {}", self.network.id());
        }
        restored
    }

    pub fn is_installed(&self) -> bool {
        self.slots.owner() == Some(self.network.id())
    }

    /// Drop routes and records and force every in-flight request idle
    pub fn clear(&self) {
        self.network.clear();
    }

    pub fn reset(&self) {
        self.clear();
    }

    pub async fn wait_for_idle(&self) {
        self.network.wait_for_idle().await;
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    pub fn on_get<B: Into<MockBody>>(&self, path: &str, body: B) -> RouteId {
        self.route(HttpMethod::Get, path).reply(body)
    }

    pub fn on_post<B: Into<MockBody>>(&self, path: &str, body: B) -> RouteId {
        self.route(HttpMethod::Post, path).reply(body)
    }

    pub fn on_put<B: Into<MockBody>>(&self, path: &str, body: B) -> RouteId {
        self.route(HttpMethod::Put, path).reply(body)
    }

    pub fn on_delete<B: Into<MockBody>>(&self, path: &str, body: B) -> RouteId {
        self.route(HttpMethod::Delete, path).reply(body)
    }

    /// Start building a route with a custom status or use count
    pub fn route(&self, method: HttpMethod, path: &str) -> RouteBuilder<'_> {
        RouteBuilder {
            engine: self,
            method,
            pattern: path.to_string(),
            status: 200,
            uses: 1,
        }
    }

    /// One-shot GET route that never responds
    pub fn on_get_hang(&self, path: &str) -> RouteId {
        self.on_hang(HttpMethod::Get, path)
    }

    pub fn on_hang(&self, method: HttpMethod, path: &str) -> RouteId {
        self.route(method, path).hang()
    }

    pub fn chaos(&self) -> Chaos<'_> {
        Chaos::new(self)
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Recorded calls, optionally filtered; `path` gains a leading `/`
    pub fn get_calls(&self, method: Option<HttpMethod>, path: Option<&str>) -> Vec<CallRecord> {
        let path = path.map(normalize_query_path);
        self.network.calls(method, path.as_deref())
    }

    pub fn get_aborted_calls(&self) -> Vec<AbortRecord> {
        self.network.aborts(None, None)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.network.routes()
    }

    pub fn pending_routes(&self) -> Vec<Route> {
        self.network.pending_routes()
    }

    // ------------------------------------------------------------------------
    // Adapters
    // ------------------------------------------------------------------------

    pub fn callback_transport(&self) -> Arc<CallbackTransport> {
        Arc::clone(&self.callback)
    }

    pub fn promise_transport(&self) -> Arc<PromiseTransport> {
        Arc::clone(&self.promise)
    }

    /// HTTP client routed through the promise adapter
    pub fn client(&self) -> HttpClient {
        HttpClient::new(
            Arc::clone(&self.promise) as Arc<dyn Transport>,
            self.config().base_url,
        )
    }
}

// ----------------------------------------------------------------------------
// Route Builder
// ----------------------------------------------------------------------------

/// Configures one route before registering it
#[must_use = "a route is only registered by reply, reply_deferred or hang"]
#[derive(Debug)]
pub struct RouteBuilder<'a> {
    engine: &'a Engine,
    method: HttpMethod,
    pattern: String,
    status: u16,
    uses: u32,
}

impl<'a> RouteBuilder<'a> {
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Number of calls the route answers before it is exhausted
    pub fn times(mut self, uses: u32) -> Self {
        self.uses = uses;
        self
    }

    pub fn reply<B: Into<MockBody>>(self, body: B) -> RouteId {
        debug!("Mocking {} {} -> {}", self.method, self.pattern, self.status);
        self.engine.network.register(
            self.method,
            &self.pattern,
            body.into(),
            self.status,
            self.uses,
        )
    }

    pub fn reply_deferred(self, deferred: Deferred) -> RouteId {
        self.reply(MockBody::Deferred(deferred))
    }

    /// Answer with a body that never settles
    pub fn hang(self) -> RouteId {
        self.reply(MockBody::Deferred(Deferred::never()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;
    use serde_json::json;

    #[test]
    fn test_registration_helpers() {
        let engine = Engine::new(EngineConfig::instant());
        engine.on_get("/a", json!(1));
        engine.on_post("/a", json!(2));
        engine.route(HttpMethod::Patch, "/b").status(204).times(3).reply(json!(null));
        engine.on_get_hang("/h");

        let routes = engine.routes();
        assert_eq!(routes.len(), 4);
        assert_eq!(routes[2].method, HttpMethod::Patch);
        assert_eq!(routes[2].status, 204);
        assert_eq!(routes[2].remaining_uses, 3);
        assert!(matches!(routes[3].body, MockBody::Deferred(_)));
        assert_eq!(routes[3].remaining_uses, 1);
    }

    #[test]
    fn test_attached_facades_share_state() {
        let engine = Engine::new(EngineConfig::instant());
        let other = engine.attach();
        other.on_get("/shared", json!(true));
        assert_eq!(engine.routes().len(), 1);
        assert!(engine.state().same_as(other.state()));

        engine.install();
        assert!(other.is_installed());
        assert!(engine.routes().is_empty());
        assert!(other.uninstall());
        assert!(!engine.is_installed());
    }

    #[test]
    fn test_uninstall_leaves_other_engines_adapters() {
        let first = Engine::new(EngineConfig::instant());
        let second = Engine::with_slots(EngineConfig::instant(), first.slots().clone());

        first.install();
        second.install();
        assert!(!first.is_installed());
        assert!(!first.uninstall());
        assert!(second.is_installed());

        assert!(second.uninstall());
        assert!(!second.is_installed());
        assert!(first.slots().get(TransportKind::Promise).is_err());
    }

    #[test]
    fn test_install_resets_state() {
        let engine = Engine::new(EngineConfig::instant());
        engine.on_get("/a", json!(1));
        engine.state().tracker().begin();
        engine.install();
        assert!(engine.routes().is_empty());
        assert!(engine.state().tracker().is_idle());
        assert_eq!(engine.state().tracker().begin().as_u64(), 1);
    }
}
