//! Settlement token pool (§4.6).
//!
//! Grounded on `kimberlite-server`'s `BytesMutPool`: a lock-free, bounded
//! pool backed by `crossbeam_queue::ArrayQueue`, sized to the link's credit
//! window so it can never be exhausted within a round of in-flight
//! messages. Unlike `BytesMutPool`, tokens here are returned to the pool by
//! the settlement path itself rather than by an explicit `put()` call from
//! the borrower, since a token's lifecycle is "borrow, dispatch, settle"
//! rather than "borrow, use, return".
//!
//! # Dual-faced tokens
//!
//! §4.6 describes a token with two faces — a persistence-completion
//! callback and a transaction-after-commit hook — and warns that using both
//! at once is forbidden. Rather than a runtime-checked tag, this is made a
//! compile-time invariant: [`SettleToken::register_on_transaction`] and
//! [`SettleToken::settle_now`] both consume `self` by value, so a token can
//! be handed to exactly one of the two call sites, never both (§9 design
//! note: "collapse this to a tagged variant... to forbid simultaneous use
//! statically" — here the "tag" is ownership itself).
//!
//! The persistence-completion face itself has two branches (§4.6: success
//! settles and replenishes, failure only logs). [`SettleToken::settle_now`]
//! is the success branch; [`SettleToken::fail_now`] is the failure branch,
//! reached via [`crate::queue::CompletionOutcome::Failure`].

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::transaction::Transaction;

/// A delivery handle a [`SettleToken`] settles when its work completes.
///
/// Implemented by the transport collaborator (out of scope here, §1).
pub trait DeliveryHandle: Send {
    /// Disposes the delivery with the transport's "accepted" outcome and
    /// settles it (§6).
    fn settle_accepted(&self);
}

/// Replenishes link credit. Implemented by the transport collaborator.
pub trait CreditSource: Send + Sync {
    fn replenish(&self, units: u32);
}

/// A reusable settlement token bound to one delivery.
///
/// Obtained from [`SettlePool::borrow`]; reset and returned to the pool
/// once its delivery has settled.
pub struct SettleToken {
    delivery_handle: Box<dyn DeliveryHandle>,
}

impl SettleToken {
    /// Settles immediately: disposes the delivery, replenishes one unit of
    /// credit, and returns `self` to `pool` for reuse. This is the
    /// persistence-completion face (§4.6) — used by the ack and admin
    /// paths, and by the demux's after-complete-operations fallback.
    pub fn settle_now(self, pool: &SettlePool, credit: &dyn CreditSource) {
        self.delivery_handle.settle_accepted();
        credit.replenish(1);
        pool.release();
    }

    /// The failure branch of the persistence-completion face (§4.6): the
    /// underlying I/O the deferred settle was waiting on failed, so the
    /// delivery is neither disposed as accepted nor replenished — only
    /// logged by the caller. The slot still returns to `pool`, since an
    /// unsettled delivery must not also leak pool capacity.
    pub fn fail_now(self, pool: &SettlePool) {
        pool.release();
    }

    /// Registers this token's settlement on `txn`'s after-commit hook: the
    /// replay path's face (§4.6). Consumes `self`, `pool`, and `credit` by
    /// move into the closure so the token cannot also be settled directly.
    pub fn register_on_transaction(
        self,
        txn: &mut dyn Transaction,
        pool: Arc<SettlePool>,
        credit: Arc<dyn CreditSource>,
    ) {
        txn.on_commit(Box::new(move || {
            self.delivery_handle.settle_accepted();
            credit.replenish(1);
            pool.release();
        }));
    }
}

/// A multi-producer, single-consumer pool of settle-token slots, sized to
/// the link's credit window (§4.6).
///
/// "Multi-producer" because release can happen from a persistence-callback
/// thread; "single-consumer" because only the handler task ever borrows
/// (§5).
pub struct SettlePool {
    slots: ArrayQueue<()>,
}

impl SettlePool {
    /// Creates a pool with `capacity` slots, matching the credit window.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SettlePool capacity must be positive");
        let slots = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = slots.push(());
        }
        Self { slots }
    }

    /// Borrows a token bound to `delivery_handle`.
    ///
    /// Returns the handle back to the caller if the pool is exhausted —
    /// this should never happen given correct credit-window sizing (§5:
    /// "sized to the credit window, so they cannot overflow"), but is
    /// surfaced rather than panicking or silently dropping the handle so a
    /// misconfiguration is observable instead of fatal.
    pub fn borrow(&self, delivery_handle: Box<dyn DeliveryHandle>) -> Result<SettleToken, Box<dyn DeliveryHandle>> {
        if self.slots.pop().is_none() {
            return Err(delivery_handle);
        }
        Ok(SettleToken { delivery_handle })
    }

    fn release(&self) {
        let _ = self.slots.push(());
    }

    pub fn available(&self) -> usize {
        self.slots.len()
    }
}
