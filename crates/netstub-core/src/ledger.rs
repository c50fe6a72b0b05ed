//! Append-only request ledger
//!
//! Records every observed call and every abort in initiation order.

use crate::types::{AbortRecord, CallRecord, HttpMethod};

#[derive(Debug, Default)]
pub struct RequestLedger {
    calls: Vec<CallRecord>,
    aborts: Vec<AbortRecord>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&mut self, record: CallRecord) {
        self.calls.push(record);
    }

    pub fn record_abort(&mut self, record: AbortRecord) {
        self.aborts.push(record);
    }

    /// Calls filtered by method and normalised path
    pub fn calls(&self, method: Option<HttpMethod>, path: Option<&str>) -> Vec<CallRecord> {
        self.calls
            .iter()
            .filter(|c| method.map_or(true, |m| c.method == m))
            .filter(|c| path.map_or(true, |p| c.path == p))
            .cloned()
            .collect()
    }

    pub fn aborts(&self, method: Option<HttpMethod>, path: Option<&str>) -> Vec<AbortRecord> {
        self.aborts
            .iter()
            .filter(|a| method.map_or(true, |m| a.method == m))
            .filter(|a| path.map_or(true, |p| a.path == p))
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.len()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.aborts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Headers, Timestamp};

    fn call(method: HttpMethod, path: &str) -> CallRecord {
        CallRecord {
            method,
            path: path.to_string(),
            base: "http://localhost".to_string(),
            mount: String::new(),
            query: None,
            headers: Headers::new(),
            body: None,
            timestamp: Timestamp::now(),
            matched: true,
        }
    }

    #[test]
    fn test_filters_by_method_and_path() {
        let mut ledger = RequestLedger::new();
        ledger.record_call(call(HttpMethod::Get, "/a"));
        ledger.record_call(call(HttpMethod::Post, "/a"));
        ledger.record_call(call(HttpMethod::Get, "/b"));

        assert_eq!(ledger.calls(None, None).len(), 3);
        assert_eq!(ledger.calls(Some(HttpMethod::Get), None).len(), 2);
        assert_eq!(ledger.calls(Some(HttpMethod::Get), Some("/a")).len(), 1);
        assert_eq!(ledger.calls(None, Some("/a")).len(), 2);
    }

    #[test]
    fn test_clear_drops_calls_and_aborts() {
        let mut ledger = RequestLedger::new();
        ledger.record_call(call(HttpMethod::Get, "/a"));
        ledger.record_abort(AbortRecord {
            method: HttpMethod::Get,
            path: "/a".to_string(),
            timestamp: Timestamp::now(),
        });
        assert_eq!(ledger.abort_count(), 1);
        ledger.clear();
        assert_eq!(ledger.call_count(), 0);
        assert_eq!(ledger.abort_count(), 0);
    }
}
