//! Listener counters
//!
//! Lock-free counters using atomic operations, updated from receive loops and
//! read through snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Listener metrics collector
pub struct LinkMetrics {
    /// Clients accepted and registered
    connections_accepted: AtomicU64,
    /// Clients removed from the registry
    connections_closed: AtomicU64,
    /// Text messages received, probes included
    messages_received: AtomicU64,
    /// Probes answered with a pong
    pings_answered: AtomicU64,
    broadcasts: AtomicU64,
    /// Messages written by broadcasts, summed over all clients
    broadcast_deliveries: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`LinkMetrics`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub messages_received: u64,
    pub pings_answered: u64,
    pub broadcasts: u64,
    pub broadcast_deliveries: u64,
    pub message_rate: f64, // messages per second
    pub uptime_seconds: u64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            pings_answered: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            broadcast_deliveries: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping(&self) {
        self.pings_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one broadcast that reached `delivered` clients
    pub fn record_broadcast(&self, delivered: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.broadcast_deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let accepted = self.connections_accepted.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        let messages = self.messages_received.load(Ordering::Relaxed);

        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            messages as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            connections_accepted: accepted,
            connections_closed: closed,
            active_connections: accepted.saturating_sub(closed),
            messages_received: messages,
            pings_answered: self.pings_answered.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            broadcast_deliveries: self.broadcast_deliveries.load(Ordering::Relaxed),
            message_rate: rate,
            uptime_seconds: uptime,
        }
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}
