//! Polling assertions
//!
//! The expectation helpers check the ledger, then wait on the event bus until
//! the count is reached or the deadline passes. A subscription is taken before
//! every re-check so no event can slip in between.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use netstub_core::{types::normalize_query_path, AssertionError, EventKind, HttpMethod};

use crate::engine::Engine;

fn render<T: Serialize + std::fmt::Debug>(records: &[T]) -> Vec<String> {
    records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap_or_else(|_| format!("{:?}", r)))
        .collect()
}

impl Engine {
    fn count_events(&self, kind: EventKind, method: HttpMethod, path: &str) -> usize {
        match kind {
            EventKind::Call => self.state().calls(Some(method), Some(path)).len(),
            EventKind::Abort => self.state().aborts(Some(method), Some(path)).len(),
        }
    }

    fn seen_events(&self, kind: EventKind, method: HttpMethod, path: &str) -> Vec<String> {
        match kind {
            EventKind::Call => render(&self.state().calls(Some(method), Some(path))),
            EventKind::Abort => render(&self.state().aborts(Some(method), Some(path))),
        }
    }

    async fn expect_event_times(
        &self,
        kind: EventKind,
        method: HttpMethod,
        path: &str,
        times: usize,
        timeout: Duration,
    ) -> Result<(), AssertionError> {
        let want = normalize_query_path(path);
        if self.count_events(kind, method, &want) >= times {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let next = self.state().bus().once(kind);
            if self.count_events(kind, method, &want) >= times {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, next).await.is_err() {
                break;
            }
        }

        if self.count_events(kind, method, &want) >= times {
            return Ok(());
        }

        debug!(
            "Gave up waiting for {} '{}' events of {} {}",
            times,
            kind.as_str(),
            method,
            want
        );
        Err(AssertionError::Timeout {
            event: kind.as_str().to_string(),
            method,
            path: path.to_string(),
            expected: times,
            timeout_ms: timeout.as_millis() as u64,
            seen: self.seen_events(kind, method, &want),
        })
    }

    /// Wait until `method path` has been called at least `times` times
    pub async fn expect_called_times(
        &self,
        method: HttpMethod,
        path: &str,
        times: usize,
    ) -> Result<(), AssertionError> {
        let timeout = self.config().expect_timeout();
        self.expect_called_times_within(method, path, times, timeout)
            .await
    }

    pub async fn expect_called_times_within(
        &self,
        method: HttpMethod,
        path: &str,
        times: usize,
        timeout: Duration,
    ) -> Result<(), AssertionError> {
        self.expect_event_times(EventKind::Call, method, path, times, timeout)
            .await
    }

    /// Wait until `method path` has been aborted at least `times` times
    pub async fn expect_aborted_times(
        &self,
        method: HttpMethod,
        path: &str,
        times: usize,
    ) -> Result<(), AssertionError> {
        let timeout = self.config().expect_timeout();
        self.expect_aborted_times_within(method, path, times, timeout)
            .await
    }

    pub async fn expect_aborted_times_within(
        &self,
        method: HttpMethod,
        path: &str,
        times: usize,
        timeout: Duration,
    ) -> Result<(), AssertionError> {
        self.expect_event_times(EventKind::Abort, method, path, times, timeout)
            .await
    }

    /// Wait for quiescence, then fail if any route still has uses left
    pub async fn expect_no_pending(&self) -> Result<(), AssertionError> {
        self.wait_for_idle().await;
        let pending = self.pending_routes();
        if pending.is_empty() {
            return Ok(());
        }
        Err(AssertionError::PendingMocks {
            routes: pending.iter().map(ToString::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netstub_core::EngineConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_expect_called_times_waits_for_late_call() {
        let engine = Engine::new(EngineConfig::instant());
        engine.on_get("/late", json!(1));

        let caller = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            caller
                .promise_transport()
                .fetch(crate::promise_transport::FetchRequest::new("/late"))
                .await
        });

        engine
            .expect_called_times_within(HttpMethod::Get, "late", 1, Duration::from_millis(500))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_reports_seen_records() {
        let engine = Engine::new(EngineConfig::instant());
        engine.on_get("/z", json!(1));
        engine
            .promise_transport()
            .fetch(crate::promise_transport::FetchRequest::new("/z"))
            .await
            .unwrap();

        let err = engine
            .expect_called_times_within(HttpMethod::Get, "/z", 2, Duration::from_millis(50))
            .await
            .unwrap_err();
        match &err {
            AssertionError::Timeout { seen, expected, .. } => {
                assert_eq!(*expected, 2);
                assert_eq!(seen.len(), 1);
                assert!(seen[0].contains("\"path\":\"/z\""));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("GET /z"));
    }

    #[tokio::test]
    async fn test_expect_no_pending_lists_unused_routes() {
        let engine = Engine::new(EngineConfig::instant());
        engine.on_get("/never", json!(1));
        engine.on_post("/also", json!(1));

        let err = engine.expect_no_pending().await.unwrap_err();
        assert_eq!(err.to_string(), "Mocks never called: GET /never, POST /also");
    }
}
