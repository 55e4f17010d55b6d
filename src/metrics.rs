//! Ambient replication counters (§SPEC_FULL B.5).
//!
//! Plain atomics rather than a `prometheus`-backed registry: this crate has
//! no HTTP exposition endpoint of its own, so the embedding server is
//! expected to read these the same way `kimberlite-server` folds
//! `kimberlite-vsr` internals into its own registry.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one mirror link.
#[derive(Default)]
pub struct MirrorMetrics {
    messages_routed: AtomicU64,
    duplicates_dropped: AtomicU64,
    credit_issued: AtomicU64,
    credit_consumed: AtomicU64,
    acks_resolved_direct: AtomicU64,
    acks_resolved_flush_retry: AtomicU64,
    acks_resolved_paged: AtomicU64,
    acks_dropped: AtomicU64,
}

impl MirrorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credit_issued(&self, units: u64) {
        self.credit_issued.fetch_add(units, Ordering::Relaxed);
    }

    pub fn record_credit_consumed(&self, units: u64) {
        self.credit_consumed.fetch_add(units, Ordering::Relaxed);
    }

    pub fn record_ack_resolved(&self, stage: crate::ack_reconciler::AckStage) {
        let counter = match stage {
            crate::ack_reconciler::AckStage::Direct => &self.acks_resolved_direct,
            crate::ack_reconciler::AckStage::FlushRetry => &self.acks_resolved_flush_retry,
            crate::ack_reconciler::AckStage::Paged => &self.acks_resolved_paged,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_dropped(&self) {
        self.acks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Credit issued minus credit consumed; should settle to zero once a
    /// link quiesces (§8 property 4).
    pub fn credit_outstanding(&self) -> i64 {
        self.credit_issued.load(Ordering::Relaxed) as i64 - self.credit_consumed.load(Ordering::Relaxed) as i64
    }

    pub fn messages_routed(&self) -> u64 {
        self.messages_routed.load(Ordering::Relaxed)
    }

    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_outstanding_tracks_issued_minus_consumed() {
        let metrics = MirrorMetrics::new();
        metrics.record_credit_issued(5);
        metrics.record_credit_consumed(3);
        assert_eq!(metrics.credit_outstanding(), 2);
    }
}
