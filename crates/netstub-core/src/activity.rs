//! In-flight request tracking
//!
//! Every matched request holds an id in the tracker from dispatch until it
//! settles or is aborted. Waiters for quiescence are released when the active
//! set empties, or when the failsafe expires and leaked ids are dropped.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::types::RequestId;

const DEFAULT_FAILSAFE: Duration = Duration::from_millis(5_000);

#[derive(Debug)]
struct TrackerState {
    /// Bumped on reset so guards from an earlier run cannot end reused ids
    epoch: u64,
    next_id: u64,
    active: BTreeSet<RequestId>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    failsafe: Duration,
}

impl TrackerState {
    fn release_waiters(&mut self) -> usize {
        let waiters = std::mem::take(&mut self.idle_waiters);
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(());
        }
        count
    }
}

/// Shared handle to the set of in-flight request ids
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILSAFE)
    }
}

impl ActivityTracker {
    pub fn new(failsafe: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                epoch: 0,
                next_id: 1,
                active: BTreeSet::new(),
                idle_waiters: Vec::new(),
                failsafe,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_failsafe(&self, failsafe: Duration) {
        self.lock().failsafe = failsafe;
    }

    /// Register a new in-flight request
    pub fn begin(&self) -> RequestId {
        Self::begin_locked(&mut self.lock())
    }

    /// Register a request whose id is released when the guard drops
    pub fn begin_guarded(&self) -> ActivityGuard {
        let mut state = self.lock();
        let id = Self::begin_locked(&mut state);
        ActivityGuard {
            id,
            epoch: state.epoch,
            tracker: self.clone(),
        }
    }

    fn begin_locked(state: &mut TrackerState) -> RequestId {
        let id = RequestId::new(state.next_id);
        state.next_id += 1;
        state.active.insert(id);
        debug!("Start request {} ({} active)", id, state.active.len());
        id
    }

    /// Mark a request settled; returns false if it was not active
    pub fn end(&self, id: RequestId) -> bool {
        let mut state = self.lock();
        Self::end_locked(&mut state, id)
    }

    fn end_in_epoch(&self, id: RequestId, epoch: u64) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            return false;
        }
        Self::end_locked(&mut state, id)
    }

    fn end_locked(state: &mut TrackerState, id: RequestId) -> bool {
        if !state.active.remove(&id) {
            return false;
        }
        debug!("End request {} ({} active)", id, state.active.len());
        if state.active.is_empty() {
            let released = state.release_waiters();
            if released > 0 {
                debug!("Network idle, releasing {} waiters", released);
            }
        }
        true
    }

    pub fn is_idle(&self) -> bool {
        self.lock().active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn active_ids(&self) -> Vec<RequestId> {
        self.lock().active.iter().copied().collect()
    }

    /// Wait until no request is in flight, bounded by the failsafe
    pub async fn wait_idle(&self) {
        let (rx, failsafe) = {
            let mut state = self.lock();
            if state.active.is_empty() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.idle_waiters.push(tx);
            debug!("Waiting for {} active requests", state.active.len());
            (rx, state.failsafe)
        };

        if tokio::time::timeout(failsafe, rx).await.is_err() {
            let leaked = self.active_ids();
            warn!(
                "Idle failsafe fired after {:?}; dropping leaked requests {:?}",
                failsafe, leaked
            );
            self.force_idle();
        }
    }

    /// Drop every active id and release all waiters; returns the number dropped
    pub fn force_idle(&self) -> usize {
        let mut state = self.lock();
        let leaked = state.active.len();
        state.active.clear();
        state.release_waiters();
        leaked
    }

    /// Force idle and restart ids at 1
    pub fn reset(&self) {
        let mut state = self.lock();
        state.active.clear();
        state.release_waiters();
        state.epoch += 1;
        state.next_id = 1;
    }
}

/// Ends its request id on drop
#[derive(Debug)]
pub struct ActivityGuard {
    id: RequestId,
    epoch: u64,
    tracker: ActivityTracker,
}

impl ActivityGuard {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// False once the tracker was reset after this request began
    pub fn is_current(&self) -> bool {
        self.tracker.lock().epoch == self.epoch
    }

    /// End the request now; returns false if it was already ended elsewhere
    pub fn finish(self) -> bool {
        self.tracker.end_in_epoch(self.id, self.epoch)
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.tracker.end_in_epoch(self.id, self.epoch);
    }
}
