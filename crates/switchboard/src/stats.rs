//! Relay counters.
//!
//! Plain atomics, updated from connection tasks without taking the
//! registry lock. Registered-identity counts come from the registry
//! itself; see [`RelayHandle::stats`](crate::RelayHandle::stats).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub(crate) struct RelayStats {
    total_accepted: AtomicU64,
    active: AtomicUsize,
    frames_routed: AtomicU64,
    overflows: AtomicU64,
    refused: AtomicU64,
}

impl RelayStats {
    /// Claims a connection slot if fewer than `max` are in use.
    pub(crate) fn try_acquire(&self, max: usize) -> bool {
        let claimed = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok();
        if claimed {
            self.total_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refused.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    pub(crate) fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn record_frame(&self) {
        self.frames_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, registered: usize) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.active.load(Ordering::Acquire),
            registered,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections currently open.
    pub connections: usize,
    /// Connections currently holding an identity.
    pub registered: usize,
    /// Connections accepted since start-up.
    pub total_accepted: u64,
    /// Frames handed to the router since start-up.
    pub frames_routed: u64,
    /// Buffer overflows since start-up.
    pub overflows: u64,
    /// Accepts closed because the connection ceiling was reached.
    pub refused: u64,
}

impl StatsSnapshot {
    pub(crate) fn log(&self) {
        tracing::info!(
            connections = self.connections,
            registered = self.registered,
            total_accepted = self.total_accepted,
            frames_routed = self.frames_routed,
            overflows = self.overflows,
            refused = self.refused,
            "relay stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_respects_ceiling() {
        let stats = RelayStats::default();

        assert!(stats.try_acquire(2));
        assert!(stats.try_acquire(2));
        assert!(!stats.try_acquire(2));

        let snap = stats.snapshot(0);
        assert_eq!(snap.connections, 2);
        assert_eq!(snap.total_accepted, 2);
        assert_eq!(snap.refused, 1);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let stats = RelayStats::default();
        assert!(stats.try_acquire(1));

        stats.release();

        assert!(stats.try_acquire(1));
        assert_eq!(stats.snapshot(0).total_accepted, 2);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = RelayStats::default();

        stats.record_frame();
        stats.record_frame();
        stats.record_overflow();

        let snap = stats.snapshot(3);
        assert_eq!(snap.frames_routed, 2);
        assert_eq!(snap.overflows, 1);
        assert_eq!(snap.registered, 3);
    }
}
