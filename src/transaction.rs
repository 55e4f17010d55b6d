//! The replay transaction boundary (§4.3 step 7, §5).
//!
//! A transaction is the linearization point for "message replicated": the
//! duplicate-ID insert is staged on it (commit persists, abort reverts),
//! and settlement is deferred to its after-commit hook so settle always
//! happens strictly after the durable effect (§3 invariants, §5).

use crate::error::MirrorResult;
use crate::event::{InternalId, OriginId};

/// A transaction spanning one replayed message's duplicate-ID insert and
/// routing side effects.
pub trait Transaction {
    /// Stages a duplicate-ID insert: visible to lookups performed through
    /// this same transaction, durable on commit, reverted on abort.
    fn stage_duplicate_insert(&mut self, origin: OriginId, internal_id: InternalId);

    /// Registers a callback to run after a successful commit. Used to
    /// release the settle token bound to this transaction (§4.6).
    fn on_commit(&mut self, f: Box<dyn FnOnce() + Send>);

    /// Commits the transaction. The duplicate-ID insert becomes durable and
    /// all `on_commit` callbacks fire, in registration order.
    fn commit(self: Box<Self>) -> MirrorResult<()>;

    /// Aborts the transaction. The duplicate-ID insert is reverted and no
    /// `on_commit` callback fires.
    fn abort(self: Box<Self>);
}
