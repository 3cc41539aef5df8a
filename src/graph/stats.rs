//! Resolution counters shared by every scope of one tree.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters; all updates are no-ops when disabled.
#[derive(Debug, Default)]
pub struct GraphStats {
    enabled: bool,
    resolutions: AtomicU64,
    links: AtomicU64,
    races_lost: AtomicU64,
    jit_lookups: AtomicU64,
    jit_syntheses: AtomicU64,
}

impl GraphStats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_resolution(&self) {
        self.bump(&self.resolutions);
    }

    pub(crate) fn record_link(&self) {
        self.bump(&self.links);
    }

    pub(crate) fn record_race_lost(&self) {
        self.bump(&self.races_lost);
    }

    pub(crate) fn record_jit_lookup(&self) {
        self.bump(&self.jit_lookups);
    }

    pub(crate) fn record_jit_synthesis(&self) {
        self.bump(&self.jit_syntheses);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            links: self.links.load(Ordering::Relaxed),
            races_lost: self.races_lost.load(Ordering::Relaxed),
            jit_lookups: self.jit_lookups.load(Ordering::Relaxed),
            jit_syntheses: self.jit_syntheses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GraphStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Top-level `resolve` calls
    pub resolutions: u64,
    /// Unlinked bindings linked, including links later discarded
    pub links: u64,
    /// Links discarded because another thread published first
    pub races_lost: u64,
    /// Just-in-time strategy invocations
    pub jit_lookups: u64,
    /// Just-in-time bindings registered
    pub jit_syntheses: u64,
}

impl StatsSnapshot {
    /// Share of links that lost the publication race.
    pub fn race_rate(&self) -> f64 {
        if self.links == 0 {
            0.0
        } else {
            self.races_lost as f64 / self.links as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} resolutions, {} links ({} races lost), {} JIT lookups, {} JIT bindings",
            self.resolutions, self.links, self.races_lost, self.jit_lookups, self.jit_syntheses
        )
    }
}
