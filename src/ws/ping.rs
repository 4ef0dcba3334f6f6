//! Application-level latency probe
//!
//! The client sends the text `"ping"` and the listener answers with `"Pong"`.
//! Both payloads are reserved: they are consumed by the receive loops and
//! never reach the message callbacks.
//!
//! At most one probe is armed at a time. A probe that times out (or is
//! replaced by a newer one) is remembered as stale, so its late pong is
//! swallowed instead of resolving the next probe. This relies on the peer
//! answering pings in order, which a single connection guarantees.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

use crate::ws::connection::Connection;

/// Probe payload sent by the client
pub const PING_PAYLOAD: &str = "ping";

/// Reply payload sent by the listener
pub const PONG_PAYLOAD: &str = "Pong";

/// Default time a probe waits for its pong
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// What an inbound pong was matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// Completed the armed probe
    Resolved,
    /// Belonged to a probe that already gave up
    Stale,
    /// No probe was waiting
    Unsolicited,
}

#[derive(Debug, Default)]
struct ProbeState {
    next_generation: u64,
    waiter: Option<(u64, oneshot::Sender<()>)>,
    stale: u32,
}

/// Keepalive probe tracker for one session
pub struct PingHandler {
    /// Pong timeout (how long to wait for pong response)
    pong_timeout: Duration,
    probe: Mutex<ProbeState>,
    /// Last measured round trip in ms (`u64::MAX` = none yet)
    last_rtt_ms: AtomicU64,
    /// Number of consecutive missed pongs
    missed_pongs: AtomicU32,
}

/// Probe health snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveHealth {
    pub last_rtt_ms: Option<u64>,
    pub missed_pongs: u32,
}

impl PingHandler {
    /// Create a handler with the default 5 second timeout
    pub fn new() -> Self {
        Self::with_timeout(PING_TIMEOUT)
    }

    pub fn with_timeout(pong_timeout: Duration) -> Self {
        Self {
            pong_timeout,
            probe: Mutex::new(ProbeState::default()),
            last_rtt_ms: AtomicU64::new(u64::MAX),
            missed_pongs: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn pong_timeout(&self) -> Duration {
        self.pong_timeout
    }

    /// Arm a fresh wait token, replacing any outstanding one
    fn arm(&self) -> (u64, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let mut probe = self.probe.lock();
        if probe.waiter.take().is_some() {
            // The replaced probe's pong is still in flight.
            probe.stale += 1;
        }
        let generation = probe.next_generation;
        probe.next_generation += 1;
        probe.waiter = Some((generation, tx));
        (generation, rx)
    }

    /// Give up on probe `generation` if it is still armed
    fn expire(&self, generation: u64) {
        let mut probe = self.probe.lock();
        if matches!(probe.waiter, Some((armed, _)) if armed == generation) {
            probe.waiter = None;
            probe.stale += 1;
            drop(probe);
            self.missed_pongs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Match an inbound pong against the outstanding probes
    pub fn record_pong(&self) -> PongOutcome {
        let mut probe = self.probe.lock();
        if probe.stale > 0 {
            probe.stale -= 1;
            return PongOutcome::Stale;
        }
        match probe.waiter.take() {
            Some((_, tx)) => {
                let _ = tx.send(());
                PongOutcome::Resolved
            }
            None => PongOutcome::Unsolicited,
        }
    }

    /// Run one probe over `connection`
    ///
    /// Returns the round trip in milliseconds, or `None` when the connection
    /// is not open or no pong arrived within the timeout.
    pub async fn probe(&self, connection: &Connection) -> Option<u64> {
        if !connection.is_open() {
            return None;
        }

        let (generation, pong) = self.arm();
        let start = Instant::now();
        let deadline = start + self.pong_timeout;

        if connection.send_async(PING_PAYLOAD).await.is_err() {
            self.expire(generation);
            return None;
        }

        match timeout_at(deadline, pong).await {
            Ok(Ok(())) => {
                let rtt = start.elapsed().as_millis() as u64;
                self.last_rtt_ms.store(rtt, Ordering::Relaxed);
                self.missed_pongs.store(0, Ordering::Relaxed);
                Some(rtt)
            }
            // Timed out, or replaced by a newer probe
            _ => {
                self.expire(generation);
                None
            }
        }
    }

    /// Get missed pongs count
    pub fn missed_count(&self) -> u32 {
        self.missed_pongs.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> KeepaliveHealth {
        let last = self.last_rtt_ms.load(Ordering::Relaxed);
        KeepaliveHealth {
            last_rtt_ms: (last != u64::MAX).then_some(last),
            missed_pongs: self.missed_count(),
        }
    }
}

impl Default for PingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_handler_creation() {
        let handler = PingHandler::new();
        assert_eq!(handler.pong_timeout(), Duration::from_secs(5));
        assert_eq!(handler.missed_count(), 0);
        assert_eq!(handler.health().last_rtt_ms, None);
    }

    #[test]
    fn test_unsolicited_pong() {
        let handler = PingHandler::new();
        assert_eq!(handler.record_pong(), PongOutcome::Unsolicited);
    }

    #[test]
    fn test_pong_resolves_armed_probe() {
        let handler = PingHandler::new();
        let (_, mut rx) = handler.arm();
        assert_eq!(handler.record_pong(), PongOutcome::Resolved);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_late_pong_does_not_resolve_next_probe() {
        let handler = PingHandler::new();

        let (first, _) = handler.arm();
        handler.expire(first);
        assert_eq!(handler.missed_count(), 1);

        let (_, mut rx) = handler.arm();
        assert_eq!(handler.record_pong(), PongOutcome::Stale);
        assert!(rx.try_recv().is_err());

        assert_eq!(handler.record_pong(), PongOutcome::Resolved);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_replacing_probe_marks_previous_stale() {
        let handler = PingHandler::new();
        let (_, mut first) = handler.arm();
        let (_, mut second) = handler.arm();

        // First receiver sees its sender dropped
        assert!(first.try_recv().is_err());

        assert_eq!(handler.record_pong(), PongOutcome::Stale);
        assert_eq!(handler.record_pong(), PongOutcome::Resolved);
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_expire_after_resolution_is_noop() {
        let handler = PingHandler::new();
        let (generation, _rx) = handler.arm();
        assert_eq!(handler.record_pong(), PongOutcome::Resolved);

        handler.expire(generation);
        assert_eq!(handler.missed_count(), 0);
        assert_eq!(handler.record_pong(), PongOutcome::Unsolicited);
    }
}
