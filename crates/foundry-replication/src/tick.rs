//! Sync cadence and network id allocation.

use std::time::Duration;

use foundry_net::NetworkId;

// ---------------------------------------------------------------------------
// TickSchedule
// ---------------------------------------------------------------------------

/// Fixed-rate scheduler for the sync pass.
///
/// Accumulates wall time from the host's update loop and reports how many
/// whole sync ticks have elapsed, independent of frame rate.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    accumulator: Duration,
    interval: Duration,
    total_ticks: u64,
}

impl TickSchedule {
    /// A schedule at `hz` ticks per second (at least 1).
    pub fn new(hz: u32) -> Self {
        Self {
            accumulator: Duration::ZERO,
            interval: Duration::from_secs(1) / hz.max(1),
            total_ticks: 0,
        }
    }

    /// Adds elapsed time and returns the number of ticks now due.
    pub fn accumulate(&mut self, dt: Duration) -> u32 {
        self.accumulator += dt;
        let mut ticks = 0u32;
        while self.accumulator >= self.interval {
            self.accumulator -= self.interval;
            self.total_ticks += 1;
            ticks += 1;
        }
        ticks
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

// ---------------------------------------------------------------------------
// NetworkIdAllocator
// ---------------------------------------------------------------------------

/// Hands out session-unique [`NetworkId`]s on the graph authority.
///
/// Ids start at 1 since 0 is [`NetworkId::INVALID`]. Every id registered in
/// the session is fed to [`observe`](Self::observe), so a peer that becomes
/// authority mid-session continues above the ids already in use.
#[derive(Debug, Clone)]
pub struct NetworkIdAllocator {
    next: u64,
}

impl NetworkIdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> NetworkId {
        let id = NetworkId(self.next);
        self.next += 1;
        id
    }

    /// Record an id assigned elsewhere.
    pub fn observe(&mut self, id: NetworkId) {
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
    }

    /// Start over from 1, for a new session.
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for NetworkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
