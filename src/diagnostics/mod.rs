//! AdminDiagnostics (C10, §4.10): runtime metrics, header/trace capture,
//! and the GET_WEBSOCKET_DIAGNOSTICS command.
//!
//! Grounded on the teacher's `monitoring::Metrics` (atomic-counter struct,
//! `snapshot()` pattern) generalized from HTTP request counters to the
//! connection/subscription/backpressure/termination counters §4.10 asks
//! for, plus a bounded ring buffer for recent upgrade headers and
//! termination reasons (the teacher has no analogue for this half; the
//! ring-buffer shape is the natural fit for "last N" without unbounded
//! growth).

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

const RING_CAPACITY: usize = 50;

/// A small bounded FIFO — push evicts the oldest entry once full. Used for
/// the "last N upgrade headers" / "recent termination reasons" diagnostics
/// §4.10 calls for.
struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Ring {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeHeaderRecord {
    pub endpoint: String,
    pub remote_addr: Option<String>,
    pub authenticated: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminationRecord {
    pub connection_id: u64,
    pub endpoint: String,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Process-wide WebSocket counters (§4.10), separate from the REST-surface
/// `monitoring::Metrics`.
#[derive(Clone)]
pub struct Diagnostics {
    pub frames_dropped: Arc<AtomicU64>,
    pub upgrades_rejected: Arc<AtomicU64>,
    upgrade_headers: Arc<Mutex<Ring<UpgradeHeaderRecord>>>,
    terminations: Arc<Mutex<Ring<TerminationRecord>>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            frames_dropped: Arc::new(AtomicU64::new(0)),
            upgrades_rejected: Arc::new(AtomicU64::new(0)),
            upgrade_headers: Arc::new(Mutex::new(Ring::new(RING_CAPACITY))),
            terminations: Arc::new(Mutex::new(Ring::new(RING_CAPACITY))),
        }
    }
}

impl Diagnostics {
    pub fn record_upgrade(&self, endpoint: &str, remote_addr: Option<String>, authenticated: bool) {
        self.upgrade_headers.lock().unwrap().push(UpgradeHeaderRecord {
            endpoint: endpoint.to_string(),
            remote_addr,
            authenticated,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn record_rejected_upgrade(&self) {
        self.upgrades_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_termination(&self, connection_id: u64, endpoint: &str, reason: &str) {
        self.terminations.lock().unwrap().push(TerminationRecord {
            connection_id,
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// GET_WEBSOCKET_DIAGNOSTICS (§4.10, admin/superadmin only).
    pub fn snapshot(
        &self,
        total_connections: usize,
        per_endpoint: Vec<(String, usize)>,
        topic_cardinalities: Vec<(String, usize)>,
    ) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            total_connections,
            per_endpoint,
            topic_cardinalities,
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            upgrades_rejected: self.upgrades_rejected.load(Ordering::Relaxed),
            recent_upgrade_headers: self.upgrade_headers.lock().unwrap().snapshot(),
            recent_terminations: self.terminations.lock().unwrap().snapshot(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsSnapshot {
    pub total_connections: usize,
    pub per_endpoint: Vec<(String, usize)>,
    pub topic_cardinalities: Vec<(String, usize)>,
    pub frames_dropped: u64,
    pub upgrades_rejected: u64,
    pub recent_upgrade_headers: Vec<UpgradeHeaderRecord>,
    pub recent_terminations: Vec<TerminationRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_once_full() {
        let mut ring: Ring<i32> = Ring::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.snapshot(), vec![2, 3]);
    }

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let diag = Diagnostics::default();
        diag.record_dropped_frame();
        diag.record_rejected_upgrade();
        let snap = diag.snapshot(1, vec![], vec![]);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.upgrades_rejected, 1);
    }
}
