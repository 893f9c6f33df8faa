//! Per-forward traffic counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a forward's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Client connections accepted.
    pub connections: u64,

    /// Outbound connects that failed or timed out.
    pub connect_failures: u64,

    /// Bytes relayed from clients to the target.
    pub bytes_sent: u64,

    /// Bytes relayed from the target back to clients.
    pub bytes_received: u64,

    /// Seconds since the forward started.
    pub uptime_secs: i64,

    /// When the forward started.
    pub started_at: DateTime<Utc>,
}

/// Thread-safe counters shared by a forward's acceptor tasks.
#[derive(Debug)]
pub struct ForwardStats {
    connections: AtomicU64,
    connect_failures: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    started_at: DateTime<Utc>,
}

impl ForwardStats {
    pub fn new() -> Self {
        Self {
            connections: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Record an accepted client connection.
    pub fn add_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed outbound connect.
    pub fn add_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add relayed byte counts.
    pub fn add_bytes(&self, sent: u64, received: u64) {
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            started_at: self.started_at,
        }
    }
}

impl Default for ForwardStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ForwardStats::new();
        stats.add_connection();
        stats.add_connection();
        stats.add_connect_failure();
        stats.add_bytes(4, 10);
        stats.add_bytes(1, 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections, 2);
        assert_eq!(snapshot.connect_failures, 1);
        assert_eq!(snapshot.bytes_sent, 5);
        assert_eq!(snapshot.bytes_received, 10);
        assert!(snapshot.uptime_secs >= 0);
    }
}
