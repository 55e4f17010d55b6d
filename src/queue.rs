//! Per-queue operations used by [`crate::ack_reconciler::AckReconciler`] and
//! by [`crate::postoffice::PostOffice::route_to_binding`].

use crate::error::MirrorError;
use crate::event::{AckReason, InternalId, OriginId};

/// A local reference to a message held somewhere in a queue's storage —
/// in-memory, intermediate, or paged (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReference {
    pub origin: OriginId,
    pub internal_id: InternalId,
    pub local_id: u64,
}

/// Outcome of scanning paged storage for `(OriginId, InternalId)` (§4.4).
///
/// A real `Queue` implementation walks paged storage in `(OriginId,
/// InternalId)` order, comparing each entry against the target identity
/// with [`crate::ack_reconciler::compare_paged_identity`] until it finds a
/// match or passes the point where one could occur.
#[derive(Debug, Clone)]
pub enum PagedScanOutcome {
    /// Found at the given index within the paging subscription.
    Found { reference: MessageReference, page_index: u64 },
    /// Scanned to exhaustion (or past the point a match could occur)
    /// without finding the identity.
    NotFound,
}

/// Outcome reported to a completion hook once the I/O it was waiting on
/// resolves (§4.6: the persistence-completion face settles and replenishes
/// credit on success, logs and drops without replenishing on failure).
#[derive(Debug)]
pub enum CompletionOutcome {
    Success,
    Failure(MirrorError),
}

/// Per-queue operations needed by ack reconciliation and replay fan-out.
///
/// Implementations are provided by the embedding broker. `Send + Sync`
/// because instances are captured by `'static` continuations scheduled
/// across completion hooks (§4.4, §5).
pub trait Queue: Send + Sync {
    /// Stage 0: remove-by-supplied-ID using the per-reference identity
    /// supplier, which reads `internal_id`/`broker_id` from each reference
    /// and substitutes `local_node_id` when the reference has no origin of
    /// its own recorded.
    fn remove_by_identity(
        &self,
        origin: &OriginId,
        internal_id: InternalId,
        local_node_id: &OriginId,
    ) -> Option<MessageReference>;

    /// Stage 1: flushes not-yet-visible (intermediate) additions so a
    /// racing replay becomes observable to a subsequent
    /// [`Queue::remove_by_identity`] retry.
    fn flush_intermediate(&self);

    /// Stage 2: scans paged storage for `(origin, internal_id)` using the
    /// 3-way comparator described in §4.4. `reason == Expired` must never
    /// reach this method (§4.4: expired acks skip paging entirely).
    fn paged_scan(&self, origin: &OriginId, internal_id: InternalId) -> PagedScanOutcome;

    /// Acknowledges against the paging subscription at `page_index`, for a
    /// match found during [`Queue::paged_scan`].
    fn ack_paged(&self, page_index: u64, reference: &MessageReference, reason: AckReason);

    /// Applies the ack to an in-memory/intermediate reference: `expire()`
    /// with no consumer when `reason == Expired`, `acknowledge()` otherwise.
    fn apply_ack(&self, reference: &MessageReference, reason: AckReason);

    /// Schedules `f` to run once all currently queued I/O for this queue
    /// drains (§4.4 stage 0→1 transition, and the deferred settle hook),
    /// reporting whether that I/O succeeded so a deferred settle can take
    /// the failure branch instead of settling (§4.6).
    fn execute_on_completion(&self, f: Box<dyn FnOnce(CompletionOutcome) + Send>);
}
