//! Proxy access log.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Tracing target for access log events.
pub const ACCESS_TARGET: &str = "graph_layer::access";

/// One completed proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub timestamp: DateTime<Utc>,
    pub client: Option<IpAddr>,
    pub method: String,
    pub uri: String,
    pub status: u16,
    /// Bytes of response body that reached the client.
    pub response_size: u64,
    pub response_time_ms: u64,
}

/// Sink for access log entries.
pub trait AccessLog: Send + Sync + std::fmt::Debug {
    fn record(&self, entry: AccessEntry);
}

/// Emits each entry as a `tracing` event on [`ACCESS_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAccessLog;

impl AccessLog for TracingAccessLog {
    fn record(&self, entry: AccessEntry) {
        tracing::info!(
            target: ACCESS_TARGET,
            timestamp = %entry.timestamp.to_rfc3339(),
            client = %entry.client.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string()),
            method = %entry.method,
            uri = %entry.uri,
            status = entry.status,
            response_size = entry.response_size,
            response_time_ms = entry.response_time_ms,
            "access"
        );
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAccessLog {
    entries: Arc<Mutex<Vec<AccessEntry>>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AccessEntry> {
        self.entries.lock().clone()
    }
}

impl AccessLog for MemoryAccessLog {
    fn record(&self, entry: AccessEntry) {
        self.entries.lock().push(entry);
    }
}

/// An in-progress entry, written to the log when dropped.
///
/// Moved into the streaming response body so the entry is recorded once the
/// last byte has been sent (or the client went away).
pub(crate) struct AccessRecord {
    log: Arc<dyn AccessLog>,
    started: Instant,
    timestamp: DateTime<Utc>,
    client: Option<IpAddr>,
    method: String,
    uri: String,
    status: u16,
    bytes: u64,
}

impl AccessRecord {
    pub(crate) fn start(
        log: Arc<dyn AccessLog>,
        client: Option<IpAddr>,
        method: &str,
        uri: &str,
    ) -> Self {
        Self {
            log,
            started: Instant::now(),
            timestamp: Utc::now(),
            client,
            method: method.to_string(),
            uri: uri.to_string(),
            status: 0,
            bytes: 0,
        }
    }

    pub(crate) fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub(crate) fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
    }
}

impl Drop for AccessRecord {
    fn drop(&mut self) {
        self.log.record(AccessEntry {
            timestamp: self.timestamp,
            client: self.client,
            method: std::mem::take(&mut self.method),
            uri: std::mem::take(&mut self.uri),
            status: self.status,
            response_size: self.bytes,
            response_time_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_on_drop() {
        let log = MemoryAccessLog::new();
        {
            let mut record = AccessRecord::start(
                Arc::new(log.clone()),
                Some("127.0.0.1".parse().unwrap()),
                "GET",
                "/me?$select=mail",
            );
            record.set_status(200);
            record.add_bytes(10);
            record.add_bytes(5);
            assert!(log.entries().is_empty());
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, 200);
        assert_eq!(entries[0].response_size, 15);
        assert_eq!(entries[0].uri, "/me?$select=mail");
    }
}
