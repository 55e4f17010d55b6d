//! In-memory fakes for the external-collaborator traits (§SPEC_FULL B.4).
//!
//! Gated behind `#[cfg(any(test, feature = "testing"))]` the same way
//! `kimberlite-test-harness` is a separate, test-only crate wrapping the
//! real server — scaled down here to a module since this crate's surface
//! is a handful of traits rather than a whole embedded database.

#![cfg(any(test, feature = "testing"))]

pub mod fakes {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::error::{MirrorError, MirrorResult};
    use crate::event::{AckReason, InternalId, OriginId};
    use crate::origin_cache::DuplicateIdCache;
    use crate::postoffice::{
        AddressInfo, ApplyOutcome, DestroyQueueOptions, PostOffice, QueueBinding, QueueConfig,
        ReplicatedMessage,
    };
    use crate::queue::{CompletionOutcome, MessageReference, PagedScanOutcome, Queue};
    use crate::settle_pool::{CreditSource, DeliveryHandle};
    use crate::transaction::Transaction;

    #[derive(Default)]
    struct PostOfficeState {
        addresses: HashMap<String, AddressInfo>,
        queues: HashMap<String, QueueConfig>,
        bindings: HashMap<String, Vec<QueueBinding>>,
        queue_handles: HashMap<String, Arc<FakeQueue>>,
        next_message_id: u64,
        routed: Vec<ReplicatedMessage>,
        /// When set, `route_by_address`/`route_to_binding` fail every call —
        /// used to exercise the replay engine's abort-on-routing-error path.
        fail_routing: bool,
    }

    /// An in-memory stand-in for the surrounding broker's address/queue API.
    ///
    /// `bindings` must be registered explicitly via
    /// [`FakePostOffice::bind`]; `create_queue` does not implicitly create
    /// one, matching the real broker where binding is a distinct operation.
    pub struct FakePostOffice {
        state: Mutex<PostOfficeState>,
    }

    impl FakePostOffice {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(PostOfficeState::default()),
            }
        }

        /// Registers a binding for `queue_name` on `address`, backed by a
        /// fresh [`FakeQueue`] reachable through [`PostOffice::queue`].
        pub fn bind(&self, address: &str, queue_name: &str) {
            let mut state = self.state.lock().unwrap();
            state
                .bindings
                .entry(address.to_string())
                .or_default()
                .push(QueueBinding {
                    queue_name: queue_name.to_string(),
                });
            state
                .queue_handles
                .entry(queue_name.to_string())
                .or_insert_with(|| Arc::new(FakeQueue::new()));
        }

        pub fn queue_count(&self) -> usize {
            self.state.lock().unwrap().queues.len()
        }

        pub fn routed_messages(&self) -> Vec<ReplicatedMessage> {
            self.state.lock().unwrap().routed.clone()
        }

        pub fn set_fail_routing(&self, fail: bool) {
            self.state.lock().unwrap().fail_routing = fail;
        }

        /// The fake queue behind `queue_name`, if one has been bound.
        pub fn fake_queue(&self, queue_name: &str) -> Option<Arc<FakeQueue>> {
            self.state.lock().unwrap().queue_handles.get(queue_name).cloned()
        }
    }

    impl Default for FakePostOffice {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PostOffice for FakePostOffice {
        fn add_address(&self, info: &AddressInfo) -> MirrorResult<ApplyOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.addresses.insert(info.name.clone(), info.clone()).is_some() {
                Ok(ApplyOutcome::AlreadySatisfied)
            } else {
                Ok(ApplyOutcome::Applied)
            }
        }

        fn delete_address(&self, info: &AddressInfo) -> MirrorResult<ApplyOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.addresses.remove(&info.name).is_some() {
                Ok(ApplyOutcome::Applied)
            } else {
                Ok(ApplyOutcome::AlreadySatisfied)
            }
        }

        fn create_queue(&self, cfg: &QueueConfig) -> MirrorResult<ApplyOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.queues.insert(cfg.name.clone(), cfg.clone()).is_some() {
                Ok(ApplyOutcome::AlreadySatisfied)
            } else {
                Ok(ApplyOutcome::Applied)
            }
        }

        fn delete_queue(&self, _address: &str, queue: &str, _options: DestroyQueueOptions) -> MirrorResult<ApplyOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.queues.remove(queue).is_some() {
                Ok(ApplyOutcome::Applied)
            } else {
                Ok(ApplyOutcome::AlreadySatisfied)
            }
        }

        fn bindings(&self, address: &str) -> Vec<QueueBinding> {
            self.state
                .lock()
                .unwrap()
                .bindings
                .get(address)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|b| QueueBinding { queue_name: b.queue_name })
                .collect()
        }

        fn queue(&self, name: &str) -> Option<Arc<dyn Queue>> {
            self.state
                .lock()
                .unwrap()
                .queue_handles
                .get(name)
                .cloned()
                .map(|q| q as Arc<dyn Queue>)
        }

        fn route_to_binding(&self, binding: &QueueBinding, message: &ReplicatedMessage) -> MirrorResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_routing {
                return Err(MirrorError::Routing(format!("fake routing failure for {}", binding.queue_name)));
            }
            state.routed.push(message.clone());
            Ok(())
        }

        fn route_by_address(&self, _address: &str, message: &ReplicatedMessage) -> MirrorResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_routing {
                return Err(MirrorError::Routing("fake routing failure".into()));
            }
            state.routed.push(message.clone());
            Ok(())
        }

        fn begin_transaction(&self) -> Box<dyn Transaction> {
            Box::new(FakeTransaction::new())
        }

        fn duplicate_id_cache(&self, _cache_key: &str, capacity: usize) -> DuplicateIdCache {
            DuplicateIdCache::new(capacity)
        }

        fn next_message_id(&self) -> u64 {
            let mut state = self.state.lock().unwrap();
            state.next_message_id += 1;
            state.next_message_id
        }
    }

    #[derive(Default)]
    struct QueueState {
        references: Vec<MessageReference>,
        intermediate: Vec<MessageReference>,
        paged: Vec<MessageReference>,
        acked: Vec<(MessageReference, AckReason)>,
        completion_hooks: Vec<Box<dyn FnOnce(CompletionOutcome) + Send>>,
    }

    /// An in-memory queue, driven directly by tests to arrange the
    /// in-memory/intermediate/paged placement [`crate::ack_reconciler::AckReconciler`]
    /// must reconcile against.
    pub struct FakeQueue {
        state: Mutex<QueueState>,
    }

    impl FakeQueue {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(QueueState::default()),
            }
        }

        pub fn seed_direct(&self, reference: MessageReference) {
            self.state.lock().unwrap().references.push(reference);
        }

        pub fn seed_intermediate(&self, reference: MessageReference) {
            self.state.lock().unwrap().intermediate.push(reference);
        }

        pub fn seed_paged(&self, reference: MessageReference) {
            self.state.lock().unwrap().paged.push(reference);
        }

        pub fn acked(&self) -> Vec<(MessageReference, AckReason)> {
            self.state.lock().unwrap().acked.clone()
        }

        /// Runs every hook queued via [`Queue::execute_on_completion`] so
        /// far, in registration order, reporting [`CompletionOutcome::Success`]
        /// — stands in for the storage layer's async completion notification
        /// when the underlying I/O succeeded.
        pub fn run_completion_hooks(&self) {
            let hooks = std::mem::take(&mut self.state.lock().unwrap().completion_hooks);
            for hook in hooks {
                hook(CompletionOutcome::Success);
            }
        }

        /// Like [`FakeQueue::run_completion_hooks`], but reports
        /// [`CompletionOutcome::Failure`] to every queued hook — exercises
        /// the completion-failure branch (§4.6).
        pub fn fail_completion_hooks(&self, reason: &str) {
            let hooks = std::mem::take(&mut self.state.lock().unwrap().completion_hooks);
            for hook in hooks {
                hook(CompletionOutcome::Failure(MirrorError::Queue(reason.to_string())));
            }
        }
    }

    impl Default for FakeQueue {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Queue for FakeQueue {
        fn remove_by_identity(&self, origin: &OriginId, internal_id: InternalId, local_node_id: &OriginId) -> Option<MessageReference> {
            let mut state = self.state.lock().unwrap();
            let position = state.references.iter().position(|r| {
                let effective_origin = if r.origin == *local_node_id { local_node_id } else { &r.origin };
                effective_origin == origin && r.internal_id == internal_id
            })?;
            Some(state.references.remove(position))
        }

        fn flush_intermediate(&self) {
            let mut state = self.state.lock().unwrap();
            let moved = std::mem::take(&mut state.intermediate);
            state.references.extend(moved);
        }

        fn paged_scan(&self, origin: &OriginId, internal_id: InternalId) -> PagedScanOutcome {
            let state = self.state.lock().unwrap();
            match state
                .paged
                .iter()
                .enumerate()
                .find(|(_, r)| crate::ack_reconciler::compare_paged_identity(&r.origin, r.internal_id, origin, internal_id) == std::cmp::Ordering::Equal)
            {
                Some((index, reference)) => PagedScanOutcome::Found {
                    reference: reference.clone(),
                    page_index: index as u64,
                },
                None => PagedScanOutcome::NotFound,
            }
        }

        fn ack_paged(&self, page_index: u64, reference: &MessageReference, reason: AckReason) {
            let mut state = self.state.lock().unwrap();
            if (page_index as usize) < state.paged.len() {
                state.paged.remove(page_index as usize);
            }
            state.acked.push((reference.clone(), reason));
        }

        fn apply_ack(&self, reference: &MessageReference, reason: AckReason) {
            self.state.lock().unwrap().acked.push((reference.clone(), reason));
        }

        fn execute_on_completion(&self, f: Box<dyn FnOnce(CompletionOutcome) + Send>) {
            self.state.lock().unwrap().completion_hooks.push(f);
        }
    }

    #[derive(Default)]
    struct TransactionState {
        staged: Vec<(OriginId, InternalId)>,
        on_commit: Vec<Box<dyn FnOnce() + Send>>,
    }

    /// A transaction whose commit always succeeds, unless
    /// [`FakeTransaction::fail_next_commit`] is set.
    pub struct FakeTransaction {
        state: TransactionState,
        fail_commit: bool,
    }

    impl FakeTransaction {
        pub fn new() -> Self {
            Self {
                state: TransactionState::default(),
                fail_commit: false,
            }
        }

        pub fn fail_next_commit(mut self) -> Self {
            self.fail_commit = true;
            self
        }
    }

    impl Default for FakeTransaction {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transaction for FakeTransaction {
        fn stage_duplicate_insert(&mut self, origin: OriginId, internal_id: InternalId) {
            self.state.staged.push((origin, internal_id));
        }

        fn on_commit(&mut self, f: Box<dyn FnOnce() + Send>) {
            self.state.on_commit.push(f);
        }

        fn commit(self: Box<Self>) -> MirrorResult<()> {
            if self.fail_commit {
                return Err(MirrorError::Transaction("fake commit failure".into()));
            }
            for hook in self.state.on_commit {
                hook();
            }
            Ok(())
        }

        fn abort(self: Box<Self>) {}
    }

    /// A delivery handle recording whether it was settled, for assertions.
    pub struct FakeDeliveryHandle {
        settled: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FakeDeliveryHandle {
        pub fn new() -> (Self, Arc<std::sync::atomic::AtomicBool>) {
            let settled = Arc::new(std::sync::atomic::AtomicBool::new(false));
            (
                Self {
                    settled: Arc::clone(&settled),
                },
                settled,
            )
        }
    }

    impl DeliveryHandle for FakeDeliveryHandle {
        fn settle_accepted(&self) {
            self.settled.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// A credit source recording total units replenished.
    #[derive(Default)]
    pub struct FakeCreditSource {
        replenished: std::sync::atomic::AtomicU32,
    }

    impl FakeCreditSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn replenished(&self) -> u32 {
            self.replenished.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl CreditSource for FakeCreditSource {
        fn replenish(&self, units: u32) {
            self.replenished.fetch_add(units, std::sync::atomic::Ordering::SeqCst);
        }
    }
}
