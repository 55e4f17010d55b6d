//! End-to-end scenarios for a single mirror link (§8 S1-S8), driven entirely
//! against the in-memory fakes from [`mirror_replica::testing::fakes`].

use std::sync::Arc;

use mirror_replica::ack_reconciler::{AckOutcome, AckReconciler};
use mirror_replica::admin::AdminApplier;
use mirror_replica::config::MirrorLinkConfig;
use mirror_replica::event::{AckReason, InternalId, OriginId};
use mirror_replica::origin_cache::OriginCacheRegistry;
use mirror_replica::postoffice::{PostOffice, QueueConfig, ReplicatedMessage};
use mirror_replica::queue::MessageReference;
use mirror_replica::replay::ReplayEngine;
use mirror_replica::settle_pool::{CreditSource, SettlePool};
use mirror_replica::testing::fakes::{FakeCreditSource, FakeDeliveryHandle, FakePostOffice};

fn token_and_settled() -> (mirror_replica::settle_pool::SettleToken, Arc<std::sync::atomic::AtomicBool>) {
    let (handle, settled) = FakeDeliveryHandle::new();
    let pool = SettlePool::new(1);
    let token = pool.borrow(Box::new(handle)).expect("capacity for one token");
    (token, settled)
}

#[test]
fn s1_admin_idempotency() {
    let post_office = FakePostOffice::new();
    let applier = AdminApplier::new();
    let cfg = QueueConfig {
        name: "q1".into(),
        address: "a1".into(),
        durable: true,
    };

    applier.create_queue(&post_office, &cfg).unwrap();
    applier.create_queue(&post_office, &cfg).unwrap();

    assert_eq!(post_office.queue_count(), 1);
}

#[test]
fn s2_data_replay_with_target_queues() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");
    post_office.bind("a1", "q2");
    post_office.bind("a1", "q3");

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let mut registry = OriginCacheRegistry::new(16);
    let replay = ReplayEngine::new();
    let link = MirrorLinkConfig::testing();

    let origin = OriginId::new("B");
    let message = ReplicatedMessage::new("a1", origin.clone(), InternalId::new(42), bytes::Bytes::from_static(b"payload"));
    let (handle, settled) = FakeDeliveryHandle::new();
    let token = pool.borrow(Box::new(handle)).unwrap();

    let target_queues = vec!["q1".to_string(), "q3".to_string()];
    let result = replay.replay(
        message,
        None,
        Some(&target_queues),
        token,
        &post_office,
        &mut registry,
        &link,
        Arc::clone(&pool),
        credit as Arc<dyn CreditSource>,
    );

    assert!(matches!(result, mirror_replica::replay::ReplayResult::Routed));
    assert!(settled.load(std::sync::atomic::Ordering::SeqCst), "after-commit hook must settle");

    let routed = post_office.routed_messages();
    assert_eq!(routed.len(), 2, "one copy on q1, one on q3, none on q2");

    let cache_key = link.cache_key(origin.as_str());
    let cache = registry.get(&origin, &post_office, &cache_key);
    assert!(cache.contains(InternalId::new(42)));
}

#[test]
fn s3_duplicate_suppression() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let mut registry = OriginCacheRegistry::new(16);
    let replay = ReplayEngine::new();
    let link = MirrorLinkConfig::testing();
    let origin = OriginId::new("B");

    // First delivery, committed normally.
    let first = ReplicatedMessage::new("a1", origin.clone(), InternalId::new(42), bytes::Bytes::from_static(b"payload"));
    let (_handle, _settled) = FakeDeliveryHandle::new();
    let token = pool.borrow(Box::new(_handle)).unwrap();
    let _ = replay.replay(first, None, None, token, &post_office, &mut registry, &link, Arc::clone(&pool), Arc::clone(&credit) as Arc<dyn CreditSource>);

    // Retransmission of the same (origin, internal_id).
    let again = ReplicatedMessage::new("a1", origin, InternalId::new(42), bytes::Bytes::from_static(b"payload"));
    let (handle, settled) = FakeDeliveryHandle::new();
    let token = pool.borrow(Box::new(handle)).unwrap();
    let routed_before = post_office.routed_messages().len();

    let result = replay.replay(again, None, None, token, &post_office, &mut registry, &link, Arc::clone(&pool), Arc::clone(&credit) as Arc<dyn CreditSource>);

    match result {
        mirror_replica::replay::ReplayResult::Duplicate(token) => {
            token.settle_now(&pool, credit.as_ref());
        }
        _ => panic!("expected Duplicate"),
    }
    assert!(settled.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(post_office.routed_messages().len(), routed_before, "no new enqueue");
}

#[test]
fn s4_ack_stage0_hit() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");
    let queue = post_office.fake_queue("q1").unwrap();
    let link = MirrorLinkConfig::testing();
    let local_node_id = OriginId::new(link.remote_mirror_id.clone());
    let origin = OriginId::new("B");

    queue.seed_direct(MessageReference {
        origin: origin.clone(),
        internal_id: InternalId::new(42),
        local_id: 1,
    });

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
    let reconciler = AckReconciler::new();

    let ack = mirror_replica::ack_reconciler::PendingAck {
        origin,
        internal_id: InternalId::new(42),
        queue: "q1".into(),
        reason: AckReason::Normal,
    };
    let (token, settled) = token_and_settled();

    let outcome = reconciler.reconcile(ack, token, &post_office, local_node_id, Arc::clone(&pool), credit as Arc<dyn CreditSource>, metrics);
    assert!(matches!(outcome, AckOutcome::Owned));
    assert!(!settled.load(std::sync::atomic::Ordering::SeqCst), "settlement is deferred to the completion hook, not synchronous");

    queue.run_completion_hooks();
    assert!(settled.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(queue.acked().len(), 1);
}

/// §4.6's failure branch: a deferred settle whose underlying persistence
/// fails must not dispose the delivery as accepted or replenish credit,
/// but must still release its pool slot.
#[test]
fn s4b_ack_deferred_settle_completion_failure_does_not_replenish() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");
    let queue = post_office.fake_queue("q1").unwrap();
    let link = MirrorLinkConfig::testing();
    let local_node_id = OriginId::new(link.remote_mirror_id.clone());
    let origin = OriginId::new("B");

    queue.seed_direct(MessageReference {
        origin: origin.clone(),
        internal_id: InternalId::new(43),
        local_id: 1,
    });

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
    let reconciler = AckReconciler::new();

    let ack = mirror_replica::ack_reconciler::PendingAck {
        origin,
        internal_id: InternalId::new(43),
        queue: "q1".into(),
        reason: AckReason::Normal,
    };
    let (token, settled) = token_and_settled();

    reconciler.reconcile(ack, token, &post_office, local_node_id, Arc::clone(&pool), Arc::clone(&credit) as Arc<dyn CreditSource>, metrics);
    queue.fail_completion_hooks("simulated persistence failure");

    assert!(!settled.load(std::sync::atomic::Ordering::SeqCst), "failure branch must not dispose as accepted");
    assert_eq!(credit.replenished(), 0, "failure branch must not replenish credit");
    assert_eq!(queue.acked().len(), 1, "the ack was still applied before the completion outcome arrived");
}

#[test]
fn s5_ack_race_resolves_on_stage1_after_flush() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");
    let queue = post_office.fake_queue("q1").unwrap();
    let link = MirrorLinkConfig::testing();
    let local_node_id = OriginId::new(link.remote_mirror_id.clone());
    let origin = OriginId::new("B");

    // The data message hasn't committed into `references` yet; it is only
    // visible in `intermediate`, simulating a still-in-flight replay.
    queue.seed_intermediate(MessageReference {
        origin: origin.clone(),
        internal_id: InternalId::new(100),
        local_id: 2,
    });

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
    let reconciler = AckReconciler::new();

    let ack = mirror_replica::ack_reconciler::PendingAck {
        origin,
        internal_id: InternalId::new(100),
        queue: "q1".into(),
        reason: AckReason::Normal,
    };
    let (token, settled) = token_and_settled();

    let outcome = reconciler.reconcile(ack, token, &post_office, local_node_id, Arc::clone(&pool), credit as Arc<dyn CreditSource>, metrics);
    assert!(matches!(outcome, AckOutcome::Owned));
    assert!(!settled.load(std::sync::atomic::Ordering::SeqCst), "stage 0 must miss before the reference is flushed");

    // The storage layer's completion hook now fires (stage 1: flush + retry
    // finds the reference and defers settlement onto a fresh hook).
    queue.run_completion_hooks();
    assert!(!settled.load(std::sync::atomic::Ordering::SeqCst), "ack applied, settle itself is deferred again");
    queue.run_completion_hooks();
    assert!(settled.load(std::sync::atomic::Ordering::SeqCst), "stage 1 retry finds the reference after flush");
    assert_eq!(queue.acked().len(), 1);
}

#[test]
fn s6_ack_on_paged_message_non_expired() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");
    let queue = post_office.fake_queue("q1").unwrap();
    let link = MirrorLinkConfig::testing();
    let local_node_id = OriginId::new(link.remote_mirror_id.clone());
    let origin = OriginId::new("B");

    queue.seed_paged(MessageReference {
        origin: origin.clone(),
        internal_id: InternalId::new(200),
        local_id: 3,
    });

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
    let reconciler = AckReconciler::new();

    let ack = mirror_replica::ack_reconciler::PendingAck {
        origin,
        internal_id: InternalId::new(200),
        queue: "q1".into(),
        reason: AckReason::Normal,
    };
    let (token, settled) = token_and_settled();

    reconciler.reconcile(ack, token, &post_office, local_node_id, Arc::clone(&pool), credit as Arc<dyn CreditSource>, metrics);
    queue.run_completion_hooks(); // stage 0 miss -> schedules stage 1
    queue.run_completion_hooks(); // stage 2's deferred settle

    assert!(settled.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(queue.acked().len(), 1);
}

#[test]
fn s7_ack_on_paged_expired_skips_scan() {
    let post_office = FakePostOffice::new();
    post_office.bind("a1", "q1");
    let queue = post_office.fake_queue("q1").unwrap();
    let link = MirrorLinkConfig::testing();
    let local_node_id = OriginId::new(link.remote_mirror_id.clone());
    let origin = OriginId::new("B");

    // Deliberately do not seed anything into paged storage: an expired ack
    // must settle without ever consulting it.
    let _ = &origin;

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
    let reconciler = AckReconciler::new();

    let ack = mirror_replica::ack_reconciler::PendingAck {
        origin: origin.clone(),
        internal_id: InternalId::new(300),
        queue: "q1".into(),
        reason: AckReason::Expired,
    };
    let (token, settled) = token_and_settled();

    reconciler.reconcile(ack, token, &post_office, local_node_id, Arc::clone(&pool), credit as Arc<dyn CreditSource>, metrics);
    assert!(!settled.load(std::sync::atomic::Ordering::SeqCst), "stage 0 still misses first");
    queue.run_completion_hooks(); // stage 1 flush+retry miss -> stage 2, expired skips scan and settles inline
    assert!(settled.load(std::sync::atomic::Ordering::SeqCst));
    assert!(queue.acked().is_empty(), "no paged entry was ever touched");
}

#[test]
fn s8_missing_queue_ack() {
    let post_office = FakePostOffice::new();
    let link = MirrorLinkConfig::testing();
    let local_node_id = OriginId::new(link.remote_mirror_id.clone());
    let origin = OriginId::new("B");

    let pool = Arc::new(SettlePool::new(4));
    let credit = Arc::new(FakeCreditSource::new());
    let metrics = Arc::new(mirror_replica::MirrorMetrics::new());
    let reconciler = AckReconciler::new();

    let ack = mirror_replica::ack_reconciler::PendingAck {
        origin,
        internal_id: InternalId::new(1),
        queue: "nonexistent-queue".into(),
        reason: AckReason::Normal,
    };
    let (token, _settled) = token_and_settled();

    let outcome = reconciler.reconcile(ack, token, &post_office, local_node_id, pool, credit as Arc<dyn CreditSource>, metrics.clone());
    match outcome {
        AckOutcome::MissingQueue(_token) => {}
        AckOutcome::Owned => panic!("expected MissingQueue"),
    }
    assert_eq!(metrics.duplicates_dropped(), 0);
}

/// §9 open question 2: a relayed ack's `broker_id` substitution must use
/// the link's remote-mirror-id exactly as §4.1 specifies, even though the
/// ack's true original origin may be neither sender nor target.
#[test]
fn relayed_ack_origin_substitution_uses_remote_mirror_id() {
    let link = MirrorLinkConfig::new(16, "relay-broker", "mirror");
    // No `broker_id` annotation on the wire: substitution must fall back to
    // the link's configured remote-mirror-id, not any other identity.
    let resolved = OriginId::new(link.remote_mirror_id.clone());
    assert_eq!(resolved.as_str(), "relay-broker");
}
