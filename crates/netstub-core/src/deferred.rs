//! Deferred response bodies
//!
//! A `Deferred` is a cloneable handle to a value that settles later. Routes
//! use it to hold a response open until the test resolves it, or forever.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::oneshot;

/// Settled value of a deferred body; `Err` carries the rejection reason
pub type DeferredResult = Result<Value, String>;

/// A shareable value that settles at most once
#[derive(Clone)]
pub struct Deferred {
    inner: Shared<BoxFuture<'static, DeferredResult>>,
}

impl Deferred {
    fn from_future<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = DeferredResult> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// A body that never settles
    pub fn never() -> Self {
        Self::from_future(future::pending())
    }

    pub fn resolved(value: Value) -> Self {
        Self::from_future(future::ready(Ok(value)))
    }

    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        Self::from_future(future::ready(Err(reason.into())))
    }

    /// A deferred settled through the returned resolver
    ///
    /// Dropping the resolver without settling leaves the deferred pending.
    pub fn channel() -> (Self, DeferredResolver) {
        let (tx, rx) = oneshot::channel::<DeferredResult>();
        let deferred = Self::from_future(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => future::pending().await,
            }
        });
        let resolver = DeferredResolver {
            sender: Mutex::new(Some(tx)),
        };
        (deferred, resolver)
    }

    /// Wait for the settled value
    pub async fn wait(&self) -> DeferredResult {
        self.inner.clone().await
    }

    /// The settled value, if the deferred has already been polled to completion
    pub fn peek(&self) -> Option<DeferredResult> {
        self.inner.peek().cloned()
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// Settles the paired `Deferred`; only the first call has any effect
pub struct DeferredResolver {
    sender: Mutex<Option<oneshot::Sender<DeferredResult>>>,
}

impl DeferredResolver {
    /// Returns false if the deferred was already settled
    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject<S: Into<String>>(&self, reason: S) -> bool {
        self.settle(Err(reason.into()))
    }

    fn settle(&self, result: DeferredResult) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for DeferredResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResolver").finish_non_exhaustive()
    }
}
