//! Tiered retry state machine for remote acks (§4.4).
//!
//! The referenced message may live in one of three progressively more
//! expensive places — the in-memory queue, its not-yet-visible
//! intermediate additions, or paged storage — and its arrival may race the
//! ack. Stages are modeled as an explicit enum and a single step function
//! (§9 design note 3) rather than mutually recursive callback chains, even
//! though each stage *is* driven by a callback scheduled on the storage
//! layer's completion hook.
//!
//! `retry_stage` from spec §3's `PendingAck` is the `AckStage` argument
//! threaded through [`AckReconciler::step`] rather than a struct field —
//! the struct never needs to answer "what stage am I at" independently of
//! the call that is currently advancing it.

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::event::{AckReason, InternalId, OriginId};
use crate::metrics::MirrorMetrics;
use crate::postoffice::PostOffice;
use crate::queue::{CompletionOutcome, PagedScanOutcome, Queue};
use crate::settle_pool::{CreditSource, SettlePool, SettleToken};

/// A remote ack awaiting reconciliation against local storage (§3).
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub origin: OriginId,
    pub internal_id: InternalId,
    pub queue: String,
    pub reason: AckReason,
}

/// A step in the reconciliation state machine (§4.4, Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStage {
    /// Direct queue scan.
    Direct,
    /// Flush intermediate additions, then retry.
    FlushRetry,
    /// Paged storage scan.
    Paged,
}

/// Outcome of submitting an ack for reconciliation.
pub enum AckOutcome {
    /// The reconciler has taken ownership of `token` and will settle it
    /// once the (possibly multi-stage) lookup resolves, successfully or
    /// not — every terminal case in §4.4 ends in a settle.
    Owned,
    /// `queue` names a queue this post-office doesn't have. The caller
    /// keeps `token` and settles it via the normal after-complete path
    /// (§4.4: "the source must not block on orphaned acks").
    MissingQueue(SettleToken),
}

/// Locates the local reference for a remote ack and applies it.
pub struct AckReconciler;

impl AckReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Entry point (§4.4). Looks up the target queue and, if present,
    /// starts the stage-0 direct scan.
    #[instrument(skip_all, fields(origin = %ack.origin, internal_id = %ack.internal_id, queue = %ack.queue))]
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile(
        &self,
        ack: PendingAck,
        token: SettleToken,
        post_office: &dyn PostOffice,
        local_node_id: OriginId,
        pool: Arc<SettlePool>,
        credit: Arc<dyn CreditSource>,
        metrics: Arc<MirrorMetrics>,
    ) -> AckOutcome {
        let Some(queue) = post_office.queue(&ack.queue) else {
            warn!("target queue missing, dropping ack");
            metrics.record_ack_dropped();
            return AckOutcome::MissingQueue(token);
        };
        Self::step(AckStage::Direct, ack, token, queue, local_node_id, pool, credit, metrics);
        AckOutcome::Owned
    }

    /// The single step function driving all three stages. Each branch
    /// either resolves (applies the ack and schedules settle) or advances
    /// monotonically to the next stage — never backward, never repeating
    /// a stage (§3 invariant, §8 property 5).
    #[allow(clippy::too_many_arguments)]
    fn step(
        stage: AckStage,
        ack: PendingAck,
        token: SettleToken,
        queue: Arc<dyn Queue>,
        local_node_id: OriginId,
        pool: Arc<SettlePool>,
        credit: Arc<dyn CreditSource>,
        metrics: Arc<MirrorMetrics>,
    ) {
        match stage {
            AckStage::Direct => {
                if let Some(reference) = queue.remove_by_identity(&ack.origin, ack.internal_id, &local_node_id) {
                    queue.apply_ack(&reference, ack.reason);
                    metrics.record_ack_resolved(AckStage::Direct);
                    Self::defer_settle(&queue, token, pool, credit);
                    return;
                }
                // Schedule stage 1 on the storage layer's completion hook:
                // this lets a racing replay materialize the reference. The
                // stage transition itself doesn't depend on whether that
                // I/O succeeded, so the outcome is ignored here.
                let queue_for_hook = Arc::clone(&queue);
                queue.execute_on_completion(Box::new(move |_outcome| {
                    Self::step(AckStage::FlushRetry, ack, token, queue_for_hook, local_node_id, pool, credit, metrics);
                }));
            }
            AckStage::FlushRetry => {
                queue.flush_intermediate();
                if let Some(reference) = queue.remove_by_identity(&ack.origin, ack.internal_id, &local_node_id) {
                    queue.apply_ack(&reference, ack.reason);
                    metrics.record_ack_resolved(AckStage::FlushRetry);
                    Self::defer_settle(&queue, token, pool, credit);
                    return;
                }
                Self::step(AckStage::Paged, ack, token, queue, local_node_id, pool, credit, metrics);
            }
            AckStage::Paged => {
                if ack.reason == AckReason::Expired {
                    // Skip paging entirely for expired acks: the message
                    // will expire again when depaged (§4.4).
                    token.settle_now(&pool, credit.as_ref());
                    return;
                }
                match queue.paged_scan(&ack.origin, ack.internal_id) {
                    PagedScanOutcome::Found { reference, page_index } => {
                        queue.ack_paged(page_index, &reference, ack.reason);
                        metrics.record_ack_resolved(AckStage::Paged);
                        Self::defer_settle(&queue, token, pool, credit);
                    }
                    PagedScanOutcome::NotFound => {
                        warn!(origin = %ack.origin, internal_id = %ack.internal_id, "no reference found after all reconciliation stages");
                        metrics.record_ack_dropped();
                        token.settle_now(&pool, credit.as_ref());
                    }
                }
            }
        }
    }

    fn defer_settle(queue: &Arc<dyn Queue>, token: SettleToken, pool: Arc<SettlePool>, credit: Arc<dyn CreditSource>) {
        queue.execute_on_completion(Box::new(move |outcome| match outcome {
            CompletionOutcome::Success => token.settle_now(&pool, credit.as_ref()),
            CompletionOutcome::Failure(err) => {
                warn!(error = %err, "persistence failed for deferred ack settle, dropping without replenish");
                token.fail_now(&pool);
            }
        }));
    }
}

impl Default for AckReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// 3-way comparator for paged-storage identity ordering (§4.4): equal
/// origins compare by `InternalId`; differing origins always advance
/// (treated as "less", i.e. keep scanning).
pub fn compare_paged_identity(
    candidate_origin: &OriginId,
    candidate_id: InternalId,
    target_origin: &OriginId,
    target_id: InternalId,
) -> std::cmp::Ordering {
    if candidate_origin == target_origin {
        candidate_id.as_i64().cmp(&target_id.as_i64())
    } else {
        std::cmp::Ordering::Less
    }
}
