//! In this module, we keep the counters for everything the capture path
//! throws away or trims. None of these conditions are errors for the reader,
//! so this is the only place they show up.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Default, Debug)]
pub struct CaptureStats {
    pub(crate) published: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) filtered: AtomicU64,
    pub(crate) overflowed: AtomicU64,
    pub(crate) truncated: AtomicU64,
    pub(crate) slot_busy: AtomicU64,
    pub(crate) orphaned_status: AtomicU64,
    pub(crate) gated: AtomicU64,
    pub(crate) timeouts: AtomicU64,
}

/// Point in time copy of [`CaptureStats`]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct StatsSnapshot {
    /// Records finalized and made visible to the reader
    pub published: u64,
    /// Records handed out by `read`
    pub delivered: u64,
    /// Frames without CSI (or with a PHY error)
    pub filtered: u64,
    /// Unread records dropped to make room
    pub overflowed: u64,
    /// Payloads or CSI uploads cut down to the slot size
    pub truncated: u64,
    /// Frames dropped because the reader held the slot they needed
    pub slot_busy: u64,
    /// Status arrivals without a staged payload
    pub orphaned_status: u64,
    /// Callbacks ignored while not recording
    pub gated: u64,
    /// Reads that waited out the timeout
    pub timeouts: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl CaptureStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            published: get(&self.published),
            delivered: get(&self.delivered),
            filtered: get(&self.filtered),
            overflowed: get(&self.overflowed),
            truncated: get(&self.truncated),
            slot_busy: get(&self.slot_busy),
            orphaned_status: get(&self.orphaned_status),
            gated: get(&self.gated),
            timeouts: get(&self.timeouts),
        }
    }
}

impl StatsSnapshot {
    /// CSI frames lost to ring pressure rather than filtering
    pub fn lost(&self) -> u64 {
        self.overflowed + self.slot_busy
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published={} delivered={} filtered={} overflowed={} truncated={} slot_busy={} orphaned={} gated={} timeouts={}",
            self.published,
            self.delivered,
            self.filtered,
            self.overflowed,
            self.truncated,
            self.slot_busy,
            self.orphaned_status,
            self.gated,
            self.timeouts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = CaptureStats::default();
        bump(&stats.published);
        bump(&stats.published);
        bump(&stats.overflowed);
        bump(&stats.slot_busy);
        let snap = stats.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.lost(), 2);
        assert!(snap.to_string().starts_with("published=2 delivered=0"));
    }
}
