//! Property tests for the invariants in §8.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use mirror_replica::config::MirrorLinkConfig;
use mirror_replica::event::{InternalId, OriginId};
use mirror_replica::origin_cache::OriginCacheRegistry;
use mirror_replica::postoffice::ReplicatedMessage;
use mirror_replica::replay::{ReplayEngine, ReplayResult};
use mirror_replica::settle_pool::{CreditSource, SettlePool};
use mirror_replica::testing::fakes::{FakeCreditSource, FakeDeliveryHandle, FakePostOffice};

proptest! {
    /// Invariant 1: exactly-once replay per identity. For any sequence of
    /// `(origin, internal_id)` pairs, however many times a pair repeats,
    /// the post-office observes it routed exactly once.
    #[test]
    fn exactly_once_replay_per_identity(
        ids in prop::collection::vec(0i64..20, 1..60),
    ) {
        let post_office = FakePostOffice::new();
        post_office.bind("a1", "q1");
        let pool = Arc::new(SettlePool::new(64));
        let credit: Arc<dyn CreditSource> = Arc::new(FakeCreditSource::new());
        let mut registry = OriginCacheRegistry::new(64);
        let replay = ReplayEngine::new();
        let link = MirrorLinkConfig::testing();
        let origin = OriginId::new("origin-a");

        let mut expected_distinct: HashSet<i64> = HashSet::new();
        let mut routed_count = 0usize;

        for raw in &ids {
            expected_distinct.insert(*raw);
            let message = ReplicatedMessage::new(
                "a1",
                origin.clone(),
                InternalId::new(*raw),
                bytes::Bytes::from_static(b"x"),
            );
            let (handle, _settled) = FakeDeliveryHandle::new();
            let token = pool.borrow(Box::new(handle)).unwrap();
            let result = replay.replay(
                message,
                None,
                None,
                token,
                &post_office,
                &mut registry,
                &link,
                Arc::clone(&pool),
                Arc::clone(&credit),
            );
            match result {
                ReplayResult::Routed => routed_count += 1,
                ReplayResult::Duplicate(token) => token.settle_now(&pool, credit.as_ref()),
                ReplayResult::Failed(..) => prop_assert!(false, "unexpected routing failure in fake setup"),
            }
        }

        // With a cache sized larger than the input range, no eviction
        // occurs, so routed_count must equal the number of distinct ids.
        prop_assert_eq!(routed_count, expected_distinct.len());
    }

    /// Invariant 4: credit conservation. Every settled or duplicate-dropped
    /// delivery replenishes exactly one unit; after draining all of them,
    /// issued - consumed == 0 once every token has settled.
    #[test]
    fn credit_conservation_after_full_drain(
        ids in prop::collection::vec(0i64..10, 1..40),
    ) {
        let post_office = FakePostOffice::new();
        post_office.bind("a1", "q1");
        let pool = Arc::new(SettlePool::new(64));
        let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
        let credit: Arc<dyn CreditSource> = Arc::new(FakeCreditSource::new());
        let mut registry = OriginCacheRegistry::new(64);
        let replay = ReplayEngine::new();
        let link = MirrorLinkConfig::testing();
        let origin = OriginId::new("origin-a");

        metrics.record_credit_issued(ids.len() as u64);

        for raw in &ids {
            let message = ReplicatedMessage::new(
                "a1",
                origin.clone(),
                InternalId::new(*raw),
                bytes::Bytes::from_static(b"x"),
            );
            let (handle, _settled) = FakeDeliveryHandle::new();
            let token = pool.borrow(Box::new(handle)).unwrap();
            match replay.replay(message, None, None, token, &post_office, &mut registry, &link, Arc::clone(&pool), Arc::clone(&credit)) {
                ReplayResult::Routed => metrics.record_credit_consumed(1),
                ReplayResult::Duplicate(token) => {
                    token.settle_now(&pool, credit.as_ref());
                    metrics.record_credit_consumed(1);
                }
                ReplayResult::Failed(..) => prop_assert!(false, "unexpected routing failure in fake setup"),
            }
        }

        prop_assert_eq!(metrics.credit_outstanding(), 0);
    }
}
