//! Exactly-once replay of data messages into the local post-office (§4.3).

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::config::MirrorLinkConfig;
use crate::error::MirrorError;
use crate::event::{InternalId, OriginId};
use crate::origin_cache::OriginCacheRegistry;
use crate::postoffice::{PostOffice, ReplicatedMessage};
use crate::settle_pool::{CreditSource, SettlePool, SettleToken};

/// Load-balancing policy fixed to local-only for every replayed message
/// (§3 invariants: "no replayed message is routed outside the local node").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancing {
    LocalOnly,
}

/// Scratch object reused per replayed message (§3).
pub struct RoutingContext {
    pub load_balancing: LoadBalancing,
    /// Duplicate detection is performed by [`ReplayEngine`] itself, so the
    /// post-office's own detection is switched off for replayed routing
    /// (§4.3 step 8).
    pub duplicate_detection: bool,
}

impl RoutingContext {
    pub fn for_replay() -> Self {
        Self {
            load_balancing: LoadBalancing::LocalOnly,
            duplicate_detection: false,
        }
    }
}

/// Outcome of attempting to replay one data message, carrying the settle
/// token back to the caller whenever this engine does *not* end up owning
/// its settlement (§4.1's ownership rule).
pub enum ReplayResult {
    /// The message was routed and the settle token was handed to the
    /// transaction's after-commit hook — the engine now owns settlement,
    /// regardless of whether the commit itself later succeeds. A failed
    /// commit is a connection-level event (§7), not a per-message error:
    /// the token simply never settles, the same as any other in-flight
    /// work when the link tears down (§5).
    Routed,
    /// A retransmission of an already-seen `(OriginId, InternalId)`. The
    /// caller still owns `token` and should hand it to the after-complete
    /// hook, which settles and replenishes credit as normal (§4.3 step 4,
    /// §8 property 4).
    Duplicate(SettleToken),
    /// Routing or commit failed. The caller still owns `token`.
    Failed(SettleToken, MirrorError),
}

/// Replays a single data message exactly once per `(OriginId, InternalId)`.
pub struct ReplayEngine;

impl ReplayEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs the full replay procedure (§4.3 steps 1-11).
    ///
    /// `message.local_id` is assigned here if unset (step 1); `message`'s
    /// `origin`/`internal_id` must already carry the resolved identity
    /// (step 2, performed by the caller since it also needs `origin` to
    /// default a missing `broker_id` annotation before reaching this
    /// engine at all).
    #[instrument(skip_all, fields(origin = %message.origin, internal_id = %message.internal_id))]
    #[allow(clippy::too_many_arguments)]
    pub fn replay(
        &self,
        mut message: ReplicatedMessage,
        internal_destination: Option<&str>,
        target_queues: Option<&[String]>,
        token: SettleToken,
        post_office: &dyn PostOffice,
        registry: &mut OriginCacheRegistry,
        link: &MirrorLinkConfig,
        pool: Arc<SettlePool>,
        credit: Arc<dyn CreditSource>,
    ) -> ReplayResult {
        // Step 1: assign a local message id if the transport didn't supply one.
        if message.local_id.is_none() {
            message.local_id = Some(post_office.next_message_id());
        }

        // Step 3: per-origin duplicate-ID cache via the registry fast path.
        let cache_key = link.cache_key(message.origin.as_str());
        let cache = registry.get(&message.origin, post_office, &cache_key);

        // Step 4: retransmission check.
        if cache.contains(message.internal_id) {
            return ReplayResult::Duplicate(token);
        }

        // Tentatively insert into the cache now, so a second replay of the
        // same identity racing this one (before this transaction resolves)
        // is also caught by the `contains` check above. Rolled back on
        // abort or failed commit, made durable on successful commit (§3).
        cache.stage(message.internal_id);

        // Step 6: rewrite address if the origin specified an internal destination.
        if let Some(destination) = internal_destination {
            message.address = destination.to_string();
        }

        // Step 7: open the replay transaction; this is the linearization point.
        let mut txn = post_office.begin_transaction();
        txn.stage_duplicate_insert(message.origin.clone(), message.internal_id);

        // Step 8: routing context — duplicate detection off, local-only.
        let _routing_ctx = RoutingContext::for_replay();

        // Step 9: route, preserving the origin's chosen fan-out when present.
        let route_result = match target_queues {
            Some(names) if !names.is_empty() => {
                self.route_named(post_office, &message, names);
                Ok(())
            }
            _ => post_office.route_by_address(&message.address, &message),
        };

        if let Err(err) = route_result {
            txn.abort();
            cache.revert_pending();
            return ReplayResult::Failed(token, err);
        }

        // Step 10/11: commit; the duplicate-ID insert becomes durable and
        // the token's after-commit hook settles + replenishes credit.
        token.register_on_transaction(&mut *txn, pool, credit);
        match txn.commit() {
            Ok(()) => cache.commit_pending(),
            Err(err) => {
                // The after-commit hook (carrying `token`) never runs for a
                // failed commit; the delivery is left unsettled and the
                // connection layer handles the resulting link loss (§7).
                // The tentative cache entry is also rolled back, since this
                // identity was never durably recorded as replicated.
                cache.revert_pending();
                tracing::error!(error = %err, "replay transaction commit failed");
            }
        }
        ReplayResult::Routed
    }

    /// Step 9's named-fan-out branch: routes directly through each binding
    /// whose queue matches a name in `target_queues`, bypassing
    /// load-balancing so fan-out matches the origin's (§4.3 step 9).
    /// Missing bindings and routing exceptions are warn-logged and do not
    /// abort the remaining targets (§7).
    fn route_named(&self, post_office: &dyn PostOffice, message: &ReplicatedMessage, names: &[String]) {
        let bindings = post_office.bindings(&message.address);
        for name in names {
            match bindings.iter().find(|b| &b.queue_name == name) {
                Some(binding) => {
                    if let Err(err) = post_office.route_to_binding(binding, message) {
                        warn!(queue = %name, error = %err, "routing exception for named target queue, continuing");
                    }
                }
                None => warn!(queue = %name, address = %message.address, "named target queue has no binding, skipping"),
            }
        }
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the origin for a data message: the `broker_id` annotation, or
/// the link's remote-mirror-id when absent (§4.3 step 2).
pub fn resolve_origin(broker_id: Option<&str>, remote_mirror_id: &str) -> OriginId {
    OriginId::new(broker_id.unwrap_or(remote_mirror_id))
}

/// Parses the wire `internal_id` annotation, defaulting to the unsigned
/// sentinel the demux treats as "absent" upstream of this module.
pub fn parse_internal_id(raw: i64) -> InternalId {
    InternalId::new(raw)
}
