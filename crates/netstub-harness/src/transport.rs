//! Transport abstraction and redirection slots
//!
//! Code under test never talks to an adapter directly. It reads the transport
//! it needs from `TransportSlots`, and the engine swaps its own adapters into
//! those slots on install.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use netstub_core::{AbortSignal, Headers, HttpMethod, Outcome, TransportError};

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

/// The two intercepted call shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Event-callback request object with a ready-state machine
    Callback,
    /// Future-returning fetch call
    Promise,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Callback => f.write_str("callback"),
            TransportKind::Promise => f.write_str("promise"),
        }
    }
}

/// A transport-neutral request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Value>,
    pub signal: Option<AbortSignal>,
}

impl Request {
    pub fn new<S: Into<String>>(method: HttpMethod, url: S) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            signal: None,
        }
    }

    pub fn get<S: Into<String>>(url: S) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Future resolving with how a dispatched request settled
pub type OutcomeFuture = BoxFuture<'static, Outcome>;

/// A network transport the code under test can dispatch through
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Start the request; side effects happen before the future is polled
    fn dispatch(&self, request: Request) -> OutcomeFuture;
}

// ----------------------------------------------------------------------------
// Transport Slots
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    current: HashMap<TransportKind, Arc<dyn Transport>>,
    /// Slots as they were before the first install
    originals: Option<HashMap<TransportKind, Arc<dyn Transport>>>,
    /// Namespace of the network state whose adapters are installed
    owner: Option<Uuid>,
}

/// Shared redirection point for transports
#[derive(Clone, Default)]
pub struct TransportSlots {
    state: Arc<RwLock<SlotState>>,
}

impl fmt::Debug for TransportSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("TransportSlots")
            .field("kinds", &state.current.keys().collect::<Vec<_>>())
            .field("owner", &state.owner)
            .finish()
    }
}

impl TransportSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SlotState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put `transport` in its slot, replacing whatever was there
    pub fn set(&self, transport: Arc<dyn Transport>) {
        self.write().current.insert(transport.kind(), transport);
    }

    pub fn get(&self, kind: TransportKind) -> Result<Arc<dyn Transport>, TransportError> {
        self.read()
            .current
            .get(&kind)
            .cloned()
            .ok_or_else(|| TransportError::NotInstalled {
                kind: kind.to_string(),
            })
    }

    /// Dispatch through the transport currently in the `kind` slot
    pub fn dispatch(
        &self,
        kind: TransportKind,
        request: Request,
    ) -> Result<OutcomeFuture, TransportError> {
        let transport = self.get(kind)?;
        Ok(transport.dispatch(request))
    }

    /// Swap `adapters` in, snapshotting the originals on the first install
    ///
    /// Returns true if this call took the snapshot.
    pub fn install(&self, owner: Uuid, adapters: Vec<Arc<dyn Transport>>) -> bool {
        let mut state = self.write();
        let first = state.originals.is_none();
        if first {
            state.originals = Some(state.current.clone());
        }
        for adapter in adapters {
            state.current.insert(adapter.kind(), adapter);
        }
        state.owner = Some(owner);
        debug!("Installed adapters for {} (snapshot taken: {})", owner, first);
        first
    }

    /// Restore the snapshotted originals
    ///
    /// Returns false if nothing was installed or `owner` did not install the
    /// current adapters.
    pub fn uninstall(&self, owner: Uuid) -> bool {
        let mut state = self.write();
        if state.owner != Some(owner) {
            debug!("Refusing uninstall by {}; installed by {:?}", owner, state.owner);
            return false;
        }
        match state.originals.take() {
            Some(originals) => {
                state.current = originals;
                state.owner = None;
                debug!("Restored original transports");
                true
            }
            None => false,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.read().originals.is_some()
    }

    /// Namespace of the state whose adapters are installed
    pub fn owner(&self) -> Option<Uuid> {
        self.read().owner
    }
}
