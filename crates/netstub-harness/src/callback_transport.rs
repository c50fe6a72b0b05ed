//! Event-callback transport
//!
//! `CallbackRequest` mimics a request object driven by a ready-state machine:
//! `open`, optional headers, `send`, then exactly one of load, error or abort
//! is reported through the registered handlers.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use netstub_core::{
    AbortSignal, ActivityGuard, Headers, HttpMethod, MockBody, NetworkState, Outcome, Response, RouteMatch,
    TransportError, NETWORK_FAILURE_STATUS,
};

use crate::transport::{OutcomeFuture, Request, Transport, TransportKind};

/// Handler invoked with the request that fired it
pub type RequestHandler = Arc<dyn Fn(&CallbackRequest) + Send + Sync>;

// ----------------------------------------------------------------------------
// Ready State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    Done = 4,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Unsent => f.write_str("UNSENT"),
            ReadyState::Opened => f.write_str("OPENED"),
            ReadyState::Done => f.write_str("DONE"),
        }
    }
}

// ----------------------------------------------------------------------------
// Request State
// ----------------------------------------------------------------------------

#[derive(Default, Clone)]
struct Handlers {
    on_ready_state_change: Option<RequestHandler>,
    on_load: Option<RequestHandler>,
    on_error: Option<RequestHandler>,
    on_abort: Option<RequestHandler>,
}

struct RequestState {
    ready_state: ReadyState,
    method: HttpMethod,
    url: String,
    headers: Headers,
    status: u16,
    response_text: String,
    response_headers: Headers,
    sent: bool,
    settled: bool,
    aborted: bool,
    /// Recorded path of a matched call, used for the abort record
    matched_path: Option<String>,
    activity: Option<ActivityGuard>,
    task: Option<JoinHandle<()>>,
}

impl Default for RequestState {
    fn default() -> Self {
        Self {
            ready_state: ReadyState::Unsent,
            method: HttpMethod::Get,
            url: String::new(),
            headers: Headers::new(),
            status: 0,
            response_text: String::new(),
            response_headers: Headers::new(),
            sent: false,
            settled: false,
            aborted: false,
            matched_path: None,
            activity: None,
            task: None,
        }
    }
}

struct RequestInner {
    network: NetworkState,
    state: Mutex<RequestState>,
    handlers: Mutex<Handlers>,
    finished: Notify,
}

/// How a scheduled completion settles the request
enum Completion {
    Load(Response),
    Error,
}

// ----------------------------------------------------------------------------
// Callback Request
// ----------------------------------------------------------------------------

/// Clone-able handle to one callback-style request
#[derive(Clone)]
pub struct CallbackRequest {
    inner: Arc<RequestInner>,
}

impl fmt::Debug for CallbackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("CallbackRequest")
            .field("method", &state.method)
            .field("url", &state.url)
            .field("ready_state", &state.ready_state)
            .field("status", &state.status)
            .field("aborted", &state.aborted)
            .finish()
    }
}

impl CallbackRequest {
    fn new(network: NetworkState) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                network,
                state: Mutex::new(RequestState::default()),
                handlers: Mutex::new(Handlers::default()),
                finished: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RequestState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> Handlers {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_handler<F>(&self, handler: F, slot: fn(&mut Handlers) -> &mut Option<RequestHandler>)
    where
        F: Fn(&CallbackRequest) + Send + Sync + 'static,
    {
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot(&mut handlers) = Some(Arc::new(handler));
    }

    fn fire(&self, handler: Option<RequestHandler>) {
        if let Some(handler) = handler {
            handler(self);
        }
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    pub fn on_ready_state_change<F>(&self, handler: F)
    where
        F: Fn(&CallbackRequest) + Send + Sync + 'static,
    {
        self.set_handler(handler, |h| &mut h.on_ready_state_change);
    }

    pub fn on_load<F>(&self, handler: F)
    where
        F: Fn(&CallbackRequest) + Send + Sync + 'static,
    {
        self.set_handler(handler, |h| &mut h.on_load);
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&CallbackRequest) + Send + Sync + 'static,
    {
        self.set_handler(handler, |h| &mut h.on_error);
    }

    pub fn on_abort<F>(&self, handler: F)
    where
        F: Fn(&CallbackRequest) + Send + Sync + 'static,
    {
        self.set_handler(handler, |h| &mut h.on_abort);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn ready_state(&self) -> ReadyState {
        self.state().ready_state
    }

    pub fn status(&self) -> u16 {
        self.state().status
    }

    pub fn response_text(&self) -> String {
        self.state().response_text.clone()
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.state()
            .response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub fn is_aborted(&self) -> bool {
        self.state().aborted
    }

    /// Wait until the request has loaded, failed or been aborted
    pub async fn finished(&self) {
        loop {
            let notified = self.inner.finished.notified();
            if self.state().settled {
                return;
            }
            notified.await;
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Reset the request to target `method url`
    pub fn open(&self, method: HttpMethod, url: &str) {
        {
            let mut state = self.state();
            if let Some(task) = state.task.take() {
                task.abort();
            }
            *state = RequestState {
                ready_state: ReadyState::Opened,
                method,
                url: url.to_string(),
                ..RequestState::default()
            };
        }
        self.fire(self.handlers().on_ready_state_change);
    }

    pub fn set_request_header(&self, name: &str, value: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.ready_state != ReadyState::Opened || state.sent {
            return Err(TransportError::InvalidState {
                expected: ReadyState::Opened.to_string(),
                actual: state.ready_state.to_string(),
            });
        }
        state.headers.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Dispatch the request; must be called from within a tokio runtime
    pub fn send(&self, body: Option<&str>) -> Result<(), TransportError> {
        self.send_watching(body, None)
    }

    /// Send, aborting at once when `signal` has already fired
    fn send_watching(
        &self,
        body: Option<&str>,
        signal: Option<&AbortSignal>,
    ) -> Result<(), TransportError> {
        let (method, url, headers) = {
            let mut state = self.state();
            if state.ready_state != ReadyState::Opened || state.sent {
                let actual = if state.sent {
                    "SENT".to_string()
                } else {
                    state.ready_state.to_string()
                };
                return Err(TransportError::InvalidState {
                    expected: ReadyState::Opened.to_string(),
                    actual,
                });
            }
            state.sent = true;
            (state.method, state.url.clone(), state.headers.clone())
        };

        let body = body.map(|text| {
            serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string()))
        });
        let dispatch = self.inner.network.resolve(method, &url, headers, body);
        let delay = self.inner.network.config().response_delay();

        let completion = match dispatch.route {
            Some(route) => {
                let mut state = self.state();
                if state.aborted {
                    // Aborted from another thread while the pipeline ran
                    drop(state);
                    let current = dispatch
                        .activity
                        .as_ref()
                        .map_or(false, ActivityGuard::is_current);
                    drop(dispatch.activity);
                    if current {
                        self.inner.network.record_abort(method, &dispatch.path);
                    }
                    return Ok(());
                }
                state.matched_path = Some(dispatch.path.clone());
                state.activity = dispatch.activity;
                drop(state);
                matched_completion(route, delay).boxed()
            }
            None => async {
                tokio::task::yield_now().await;
                Completion::Load(Response::neutral())
            }
            .boxed(),
        };

        if signal.map_or(false, AbortSignal::is_aborted) {
            self.abort();
            return Ok(());
        }

        let request = self.clone();
        let task = tokio::spawn(async move {
            let completion = completion.await;
            request.complete(completion);
        });

        let mut state = self.state();
        if state.settled {
            task.abort();
        } else {
            state.task = Some(task);
        }
        Ok(())
    }

    fn complete(&self, completion: Completion) {
        let (activity, is_load) = {
            let mut state = self.state();
            if state.settled {
                return;
            }
            state.settled = true;
            state.task = None;
            state.ready_state = ReadyState::Done;
            let is_load = match completion {
                Completion::Load(response) => {
                    state.status = response.status;
                    state.response_text = response.body;
                    state.response_headers = response.headers;
                    true
                }
                Completion::Error => {
                    state.status = 0;
                    false
                }
            };
            (state.activity.take(), is_load)
        };

        if let Some(activity) = activity {
            activity.finish();
        }

        let handlers = self.handlers();
        self.fire(handlers.on_ready_state_change);
        if is_load {
            self.fire(handlers.on_load);
        } else {
            self.fire(handlers.on_error);
        }
        self.inner.finished.notify_waiters();
    }

    /// Cancel an in-flight request
    ///
    /// No effect before `send` or after the request settled.
    pub fn abort(&self) {
        let (method, matched_path, activity) = {
            let mut state = self.state();
            if !state.sent || state.settled {
                debug!("Ignoring abort of {} {} in state {}", state.method, state.url, state.ready_state);
                return;
            }
            state.aborted = true;
            state.settled = true;
            state.ready_state = ReadyState::Done;
            state.status = 0;
            if let Some(task) = state.task.take() {
                task.abort();
            }
            (
                state.method,
                state.matched_path.clone(),
                state.activity.take(),
            )
        };

        debug!("Aborting {} {:?}", method, matched_path);
        let current = activity.as_ref().map_or(false, ActivityGuard::is_current);
        if let Some(activity) = activity {
            activity.finish();
        }
        match matched_path {
            Some(path) if current => self.inner.network.record_abort(method, &path),
            Some(path) => debug!(
                "Skipping abort record for {} {} from a cleared run",
                method, path
            ),
            None => {}
        }

        let handlers = self.handlers();
        self.fire(handlers.on_ready_state_change);
        self.fire(handlers.on_abort);
        self.fire(handlers.on_error);
        self.inner.finished.notify_waiters();
    }

    /// Settled response as an outcome; `None` while in flight
    pub fn outcome(&self) -> Option<Outcome> {
        let state = self.state();
        if !state.settled {
            return None;
        }
        if state.aborted {
            return Some(Outcome::Aborted);
        }
        if state.status == NETWORK_FAILURE_STATUS {
            return Some(Outcome::from_result(Err(TransportError::network_failure())));
        }
        let response = Response {
            status: state.status,
            headers: state.response_headers.clone(),
            body: state.response_text.clone(),
        };
        Some(Outcome::from_result(Ok(response)))
    }
}

async fn matched_completion(route: RouteMatch, delay: Duration) -> Completion {
    if route.status == NETWORK_FAILURE_STATUS {
        tokio::task::yield_now().await;
        return Completion::Error;
    }

    let value = match route.body {
        MockBody::Value(value) => value,
        MockBody::Deferred(deferred) => match deferred.wait().await {
            Ok(value) => value,
            Err(reason) => {
                debug!("Deferred body rejected: {}", reason);
                return Completion::Error;
            }
        },
    };

    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
    Completion::Load(Response::json_body(route.status, &value))
}

// ----------------------------------------------------------------------------
// Callback Transport
// ----------------------------------------------------------------------------

/// Factory for callback requests bound to one network state
#[derive(Debug, Clone)]
pub struct CallbackTransport {
    network: NetworkState,
}

impl CallbackTransport {
    pub fn new(network: NetworkState) -> Self {
        Self { network }
    }

    /// Create a fresh, unsent request
    pub fn request(&self) -> CallbackRequest {
        CallbackRequest::new(self.network.clone())
    }
}

impl Transport for CallbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Callback
    }

    fn dispatch(&self, request: Request) -> OutcomeFuture {
        let req = self.request();
        let (tx, rx) = oneshot::channel::<Outcome>();
        let sender = Arc::new(Mutex::new(Some(tx)));

        let settle = move |req: &CallbackRequest| {
            let tx = sender.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let (Some(tx), Some(outcome)) = (tx, req.outcome()) {
                let _ = tx.send(outcome);
            }
        };
        let on_error = settle.clone();
        let on_abort = settle.clone();
        req.on_load(settle);
        req.on_error(on_error);
        req.on_abort(on_abort);

        req.open(request.method, &request.url);
        for (name, value) in &request.headers {
            if let Err(e) = req.set_request_header(name, value) {
                return futures::future::ready(Outcome::NetworkFailure(e.to_string())).boxed();
            }
        }
        let body = request.body.as_ref().map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
        if let Err(e) = req.send_watching(body.as_deref(), request.signal.as_ref()) {
            return futures::future::ready(Outcome::NetworkFailure(e.to_string())).boxed();
        }

        if let Some(signal) = request.signal.filter(|_| !req.state().settled) {
            let watched = req.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = signal.aborted() => watched.abort(),
                    _ = watched.finished() => {}
                }
            });
        }

        async move {
            rx.await.unwrap_or_else(|_| {
                Outcome::NetworkFailure(
                    TransportError::Cancelled {
                        reason: "request dropped before settling".to_string(),
                    }
                    .to_string(),
                )
            })
        }
        .boxed()
    }
}
