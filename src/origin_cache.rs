//! Per-origin duplicate-ID caches and their registry (§3, §4.5).
//!
//! # Design
//!
//! [`DuplicateIdCache`] is a bounded, FIFO-eviction set of [`InternalId`]
//! values, sized to the link's credit window so it can never overflow
//! within a round of in-flight messages. Insertion is transactional: a
//! tentative add is only visible for the duration of the owning transaction
//! until that transaction commits; an abort rolls it back.
//!
//! [`OriginCacheRegistry`] maps `OriginId -> DuplicateIdCache` and keeps a
//! single-slot memoization of the most-recently-used pair, since mirror
//! streams are typically single-origin (§9 design note: "keep it as a
//! simple field, not a general LRU"). It is not thread-safe — it is only
//! ever touched from the single handler task for a link (§5).

use std::collections::{HashSet, VecDeque};

use crate::event::{InternalId, OriginId};
use crate::postoffice::PostOffice;

/// A bounded, per-origin set of seen [`InternalId`] values.
///
/// Capacity equals the link's credit window. Eviction is FIFO once
/// capacity is reached.
#[derive(Debug, Clone)]
pub struct DuplicateIdCache {
    capacity: usize,
    seen: HashSet<InternalId>,
    order: VecDeque<InternalId>,
    /// Ids inserted tentatively by an in-flight transaction, not yet
    /// committed. Looked up alongside `seen` so a second replay of the same
    /// id within the same still-open transaction is also caught.
    pending: HashSet<InternalId>,
}

impl DuplicateIdCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "DuplicateIdCache capacity must be positive");
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            pending: HashSet::new(),
        }
    }

    /// O(1) membership check against durably-committed entries and any
    /// still-pending (uncommitted) insert from this same cache instance.
    pub fn contains(&self, id: InternalId) -> bool {
        self.seen.contains(&id) || self.pending.contains(&id)
    }

    /// Stages a tentative insert. Call [`DuplicateIdCache::commit_pending`]
    /// or [`DuplicateIdCache::revert_pending`] when the owning transaction
    /// resolves.
    pub fn stage(&mut self, id: InternalId) {
        self.pending.insert(id);
    }

    /// Makes every currently staged id durable, evicting the oldest entries
    /// (FIFO) if capacity is exceeded.
    pub fn commit_pending(&mut self) {
        for id in self.pending.drain() {
            if self.seen.insert(id) {
                self.order.push_back(id);
            }
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }

    /// Discards every currently staged id without making it durable.
    pub fn revert_pending(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Maps `OriginId -> DuplicateIdCache`, memoizing the most-recently-used
/// origin key so a single-origin stream (the common case) never pays for
/// more than an equality check before landing on the right map entry
/// (§4.5; §9: "keep it as a simple field, not a general LRU").
///
/// Not thread-safe by design: only the handler task for a link touches it.
pub struct OriginCacheRegistry {
    caches: std::collections::HashMap<OriginId, DuplicateIdCache>,
    capacity: usize,
    last_origin: Option<OriginId>,
    memo_hits: u64,
}

impl OriginCacheRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            caches: std::collections::HashMap::new(),
            capacity,
            last_origin: None,
            memo_hits: 0,
        }
    }

    /// Returns the cache for `origin`, consulting the post-office's durable
    /// registry under `cache_key` on first sight (§4.5: "consults the
    /// durable registry... keyed by the concatenation of a fixed
    /// mirror-namespace prefix and the origin id").
    pub fn get(&mut self, origin: &OriginId, post_office: &dyn PostOffice, cache_key: &str) -> &mut DuplicateIdCache {
        if self.last_origin.as_ref() == Some(origin) {
            self.memo_hits += 1;
        } else {
            self.last_origin = Some(origin.clone());
        }
        let capacity = self.capacity;
        self.caches
            .entry(origin.clone())
            .or_insert_with(|| post_office.duplicate_id_cache(cache_key, capacity))
    }

    pub fn origin_count(&self) -> usize {
        self.caches.len()
    }

    /// Number of lookups served without the key changing from the previous
    /// lookup — an indicator of how single-origin this link's traffic is.
    pub fn memo_hits(&self) -> u64 {
        self.memo_hits
    }
}
