//! Counters for the elect-and-recompute protocol

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared by every listener of one coordinator
#[derive(Debug, Default)]
pub struct UpdateStats {
    triggers: AtomicU64,
    lock_contended: AtomicU64,
    skipped: AtomicU64,
    recomputed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`UpdateStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStatsSnapshot {
    /// Notifications that started a lock attempt
    pub triggers: u64,
    /// Lock attempts that timed out
    pub lock_contended: u64,
    /// Lock won but the flag had already moved on
    pub skipped: u64,
    /// Artifacts published
    pub recomputed: u64,
    /// Recomputes reverted after a pipeline error
    pub failed: u64,
    /// Attempts cut short by a registry error
    pub abandoned: u64,
}

impl UpdateStats {
    pub(crate) fn trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn contended(&self) {
        self.lock_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recompute(&self) {
        self.recomputed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fail(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn abandon(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UpdateStatsSnapshot {
        UpdateStatsSnapshot {
            triggers: self.triggers.load(Ordering::Relaxed),
            lock_contended: self.lock_contended.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            recomputed: self.recomputed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for UpdateStatsSnapshot {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            triggers: self.triggers + other.triggers,
            lock_contended: self.lock_contended + other.lock_contended,
            skipped: self.skipped + other.skipped,
            recomputed: self.recomputed + other.recomputed,
            failed: self.failed + other.failed,
            abandoned: self.abandoned + other.abandoned,
        }
    }
}
