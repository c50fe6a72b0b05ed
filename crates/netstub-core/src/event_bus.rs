//! Lifecycle event bus
//!
//! Emits `call` and `abort` events synchronously to subscribers in
//! registration order. Handlers are cloned out of the lock before they run,
//! so a handler may subscribe or unsubscribe without deadlocking.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::types::{AbortRecord, CallRecord};

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Call,
    Abort,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Call => "call",
            EventKind::Abort => "abort",
        }
    }
}

/// Event published by the request pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum NetworkEvent {
    Call(CallRecord),
    Abort(AbortRecord),
}

impl NetworkEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NetworkEvent::Call(_) => EventKind::Call,
            NetworkEvent::Abort(_) => EventKind::Abort,
        }
    }
}

/// Subscription handle returned by `EventBus::on`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

// ----------------------------------------------------------------------------
// Event Bus
// ----------------------------------------------------------------------------

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, EventKind, Handler)>,
}

/// Clone-able handle; clones share subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `handler` to events of `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.push((id, kind, Arc::new(handler)));
        id
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _, _)| *sub != id);
        state.subscribers.len() != before
    }

    /// Deliver `event` to every matching subscriber
    pub fn emit(&self, event: &NetworkEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .lock()
            .subscribers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    /// Future resolving with the next event of `kind`
    ///
    /// The subscription is registered immediately, so events emitted between
    /// this call and the first poll are not missed.
    pub fn once(&self, kind: EventKind) -> EventWaiter {
        let (tx, rx) = oneshot::channel();
        let sender = Mutex::new(Some(tx));
        let id = self.on(kind, move |event| {
            let tx = sender.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(tx) = tx {
                let _ = tx.send(event.clone());
            }
        });
        EventWaiter {
            bus: self.clone(),
            id,
            rx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Pending `once` subscription; unsubscribes when completed or dropped
pub struct EventWaiter {
    bus: EventBus,
    id: SubscriptionId,
    rx: oneshot::Receiver<NetworkEvent>,
}

impl Future for EventWaiter {
    type Output = NetworkEvent;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(event),
            // The sender lives inside our own subscription, so it is only
            // dropped if the subscription was removed out from under us.
            Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        self.bus.off(self.id);
    }
}
