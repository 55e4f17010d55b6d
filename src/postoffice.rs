//! The external-collaborator boundary: the surrounding broker's address and
//! queue APIs, abstracted as traits so this crate depends on behavior, not
//! on a concrete post-office implementation (§1: "the surrounding broker's
//! queue/address APIs... treated as an external collaborator").

use std::sync::Arc;

use serde::Deserialize;

use crate::error::MirrorResult;
use crate::event::{InternalId, OriginId};
use crate::origin_cache::DuplicateIdCache;
use crate::queue::Queue;
use crate::transaction::Transaction;

/// Administrative descriptor for `AddAddress`/`DeleteAddress` (§4.1), parsed
/// from the event body's JSON string.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressInfo {
    pub name: String,
    #[serde(default)]
    pub routing_types: Vec<String>,
}

/// Administrative descriptor for `CreateQueue` (§4.1).
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub durable: bool,
}

/// Options passed to queue destruction, pinned to the literal values §4.2
/// specifies so the source's administrative intent ("the source owns
/// lifecycle") is preserved exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyQueueOptions {
    pub remove_consumers: bool,
    pub force: bool,
    pub auto_delete_address: bool,
    pub check_consumer_count: bool,
}

impl DestroyQueueOptions {
    /// The fixed set of flags §4.2 mandates for a mirror-originated delete.
    pub fn mirror_delete() -> Self {
        Self {
            remove_consumers: false,
            force: true,
            auto_delete_address: false,
            check_consumer_count: false,
        }
    }
}

/// A single binding on an address, named so `target_queues` routing (§4.3
/// step 9) can invoke it directly, bypassing load-balancing.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub queue_name: String,
}

/// Outcome of a post-office operation that can be idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The operation changed post-office state.
    Applied,
    /// The operation was a no-op because the target already existed (create)
    /// or was already absent (delete) — still a success per §4.2/§7.
    AlreadySatisfied,
}

/// The surrounding broker's address/queue/transaction/duplicate-cache API.
///
/// Implementations are provided by the embedding broker; this crate ships
/// only an in-memory fake (under the `testing` feature) for its own tests.
///
/// `Send + Sync` because a real post-office is shared broker-wide (§5).
pub trait PostOffice: Send + Sync {
    /// Registers an address. Idempotent: already-present succeeds silently.
    fn add_address(&self, info: &AddressInfo) -> MirrorResult<ApplyOutcome>;

    /// Removes an address. Idempotent: absent succeeds silently.
    fn delete_address(&self, info: &AddressInfo) -> MirrorResult<ApplyOutcome>;

    /// Creates a queue. Idempotent: already-existing succeeds silently.
    fn create_queue(&self, cfg: &QueueConfig) -> MirrorResult<ApplyOutcome>;

    /// Destroys a queue with the given options. Idempotent: absent succeeds.
    fn delete_queue(
        &self,
        address: &str,
        queue: &str,
        options: DestroyQueueOptions,
    ) -> MirrorResult<ApplyOutcome>;

    /// Bindings registered on `address`, for `target_queues` fan-out lookup.
    fn bindings(&self, address: &str) -> Vec<QueueBinding>;

    /// Looks up a queue by name for ack reconciliation. Returned as a
    /// shared, owned handle since [`crate::ack_reconciler::AckReconciler`]
    /// captures it in `'static` continuations scheduled across the
    /// storage layer's completion hooks (§4.4, §5).
    fn queue(&self, name: &str) -> Option<Arc<dyn Queue>>;

    /// Routes a message directly through one named binding, bypassing
    /// load-balancing so fan-out matches the origin's choice (§4.3 step 9).
    fn route_to_binding(&self, binding: &QueueBinding, message: &ReplicatedMessage) -> MirrorResult<()>;

    /// Performs normal address routing when `target_queues` is absent
    /// (§4.3 step 9, "otherwise").
    fn route_by_address(&self, address: &str, message: &ReplicatedMessage) -> MirrorResult<()>;

    /// Opens a replay transaction (§5: the linearization point for
    /// "message replicated").
    fn begin_transaction(&self) -> Box<dyn Transaction>;

    /// Retrieves (creating if absent) the durable per-origin duplicate-ID
    /// cache, keyed by the mirror-namespace-prefixed cache key (§6).
    fn duplicate_id_cache(&self, cache_key: &str, capacity: usize) -> DuplicateIdCache;

    /// Assigns a fresh local message id (§4.3 step 1).
    fn next_message_id(&self) -> u64;
}

/// A data message in flight through [`crate::replay::ReplayEngine`].
///
/// Minimal representation: just enough state for routing and for the
/// broker-properties replay must attach (§4.3 step 5).
#[derive(Debug, Clone)]
pub struct ReplicatedMessage {
    pub local_id: Option<u64>,
    pub address: String,
    pub origin: OriginId,
    pub internal_id: InternalId,
    pub body: bytes::Bytes,
}

impl ReplicatedMessage {
    pub fn new(address: impl Into<String>, origin: OriginId, internal_id: InternalId, body: bytes::Bytes) -> Self {
        Self {
            local_id: None,
            address: address.into(),
            origin,
            internal_id,
            body,
        }
    }
}
