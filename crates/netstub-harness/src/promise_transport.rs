//! Future-returning fetch transport
//!
//! `fetch` runs the pipeline eagerly, then settles on a spawned task so an
//! abort is honoured even when the caller never polls the returned future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use netstub_core::{
    AbortSignal, ActivityGuard, Headers, HttpMethod, MockBody, NetworkState, Outcome, Response,
    RouteMatch, TransportError, NETWORK_FAILURE_STATUS,
};

use crate::transport::{OutcomeFuture, Request, Transport, TransportKind};

// ----------------------------------------------------------------------------
// Fetch Request
// ----------------------------------------------------------------------------

/// Input to `PromiseTransport::fetch`
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<Value>,
    pub signal: Option<AbortSignal>,
}

impl FetchRequest {
    /// A GET request for `url`
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Headers::new(),
            body: None,
            signal: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
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

impl From<Request> for FetchRequest {
    fn from(request: Request) -> Self {
        Self {
            url: request.url,
            method: request.method,
            headers: request.headers,
            body: request.body,
            signal: request.signal,
        }
    }
}

// ----------------------------------------------------------------------------
// Response Future
// ----------------------------------------------------------------------------

/// Settles with the simulated response
///
/// Non-2xx statuses resolve normally; only network failures and aborts error.
pub struct ResponseFuture {
    handle: JoinHandle<Result<Response, TransportError>>,
}

impl Future for ResponseFuture {
    type Output = Result<Response, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(TransportError::Cancelled {
                reason: e.to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ----------------------------------------------------------------------------
// Promise Transport
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PromiseTransport {
    network: NetworkState,
}

impl PromiseTransport {
    pub fn new(network: NetworkState) -> Self {
        Self { network }
    }

    /// Issue a request; must be called from within a tokio runtime
    pub fn fetch(&self, request: FetchRequest) -> ResponseFuture {
        let FetchRequest {
            url,
            method,
            headers,
            body,
            signal,
        } = request;

        let dispatch = self.network.resolve(method, &url, headers, body);
        let delay = self.network.config().response_delay();

        let route = match dispatch.route {
            Some(route) => route,
            None => {
                return ResponseFuture {
                    handle: tokio::spawn(async {
                        tokio::task::yield_now().await;
                        Ok(Response::neutral())
                    }),
                };
            }
        };

        let network = self.network.clone();
        let path = dispatch.path;
        let activity = dispatch.activity;

        let handle = tokio::spawn(async move {
            let result = match signal {
                Some(signal) => {
                    tokio::select! {
                        biased;
                        _ = signal.aborted() => {
                            if activity.as_ref().map_or(false, ActivityGuard::is_current) {
                                network.record_abort(method, &path);
                            } else {
                                debug!(
                                    "Skipping abort record for {} {} from a cleared run",
                                    method, path
                                );
                            }
                            Err(TransportError::Aborted { method, path })
                        }
                        result = settle(route, delay) => result,
                    }
                }
                None => settle(route, delay).await,
            };
            drop(activity);
            result
        });

        ResponseFuture { handle }
    }
}

async fn settle(route: RouteMatch, delay: Duration) -> Result<Response, TransportError> {
    if route.status == NETWORK_FAILURE_STATUS {
        tokio::task::yield_now().await;
        return Err(TransportError::network_failure());
    }

    let value = match route.body {
        MockBody::Value(value) => value,
        MockBody::Deferred(deferred) => deferred.wait().await.map_err(|reason| {
            debug!("Deferred body rejected: {}", reason);
            TransportError::network_failure()
        })?,
    };

    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
    Ok(Response::json_body(route.status, &value))
}

impl Transport for PromiseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Promise
    }

    fn dispatch(&self, request: Request) -> OutcomeFuture {
        let response = self.fetch(request.into());
        async move { Outcome::from_result(response.await) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netstub_core::{AbortController, Deferred, EngineConfig};
    use serde_json::json;

    fn network() -> NetworkState {
        NetworkState::new(EngineConfig::instant())
    }

    #[tokio::test]
    async fn test_fetch_resolves_matched_body() {
        let network = network();
        network.register(HttpMethod::Post, "/items", MockBody::Value(json!({"id": 3})), 201, 1);
        let transport = PromiseTransport::new(network.clone());

        let response = transport
            .fetch(FetchRequest::new("/items").method(HttpMethod::Post).json(json!({"name": "x"})))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.json::<Value>().unwrap(), json!({"id": 3}));

        let calls = network.calls(Some(HttpMethod::Post), Some("/items"));
        assert_eq!(calls[0].body, Some(json!({"name": "x"})));
        assert!(network.tracker().is_idle());
    }

    #[tokio::test]
    async fn test_non_success_status_resolves() {
        let network = network();
        network.register(HttpMethod::Get, "/gone", MockBody::Value(json!({})), 410, 1);
        let response = PromiseTransport::new(network)
            .fetch(FetchRequest::new("/gone"))
            .await
            .unwrap();
        assert_eq!(response.status, 410);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_records_eagerly_before_poll() {
        let network = network();
        network.register(HttpMethod::Get, "/eager", MockBody::Value(json!(1)), 200, 1);
        let future = PromiseTransport::new(network.clone()).fetch(FetchRequest::new("/eager"));

        assert_eq!(network.calls(None, Some("/eager")).len(), 1);
        assert_eq!(network.tracker().active_count(), 1);
        future.await.unwrap();
        assert!(network.tracker().is_idle());
    }

    #[tokio::test]
    async fn test_abort_rejects_and_records() {
        let network = network();
        network.register(HttpMethod::Get, "/hang", MockBody::Deferred(Deferred::never()), 200, 1);
        let controller = AbortController::new();
        let future = PromiseTransport::new(network.clone())
            .fetch(FetchRequest::new("/hang").signal(controller.signal()));

        controller.abort();
        let err = future.await.unwrap_err();
        assert!(err.is_abort());
        assert_eq!(network.aborts(Some(HttpMethod::Get), Some("/hang")).len(), 1);
        assert!(network.tracker().is_idle());
    }

    #[tokio::test]
    async fn test_rejected_deferred_is_network_error() {
        let network = network();
        let (deferred, resolver) = Deferred::channel();
        network.register(HttpMethod::Get, "/flaky", MockBody::Deferred(deferred), 200, 1);
        let future = PromiseTransport::new(network.clone()).fetch(FetchRequest::new("/flaky"));

        resolver.reject("backend exploded");
        let err = future.await.unwrap_err();
        assert_eq!(err, TransportError::network_failure());
        assert!(network.tracker().is_idle());
    }

    #[tokio::test]
    async fn test_unmatched_ignores_signal() {
        let network = network();
        let controller = AbortController::new();
        controller.abort();
        let response = PromiseTransport::new(network.clone())
            .fetch(FetchRequest::new("/free").signal(controller.signal()))
            .await
            .unwrap();
        assert_eq!(response.json::<Value>().unwrap(), json!({"data": {}}));
        assert!(network.aborts(None, None).is_empty());
    }
}
