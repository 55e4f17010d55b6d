//! Inspects wire annotations and dispatches to the right subsystem (§4.1).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::admin::AdminApplier;
use crate::ack_reconciler::{AckOutcome, AckReconciler, PendingAck};
use crate::config::MirrorLinkConfig;
use crate::controller_scope::ControllerScope;
use crate::error::{MirrorError, MirrorResult};
use crate::event::{AckReason, BodyFormat, EventKind, InboundEvent, InternalId, OriginId};
use crate::metrics::MirrorMetrics;
use crate::origin_cache::OriginCacheRegistry;
use crate::postoffice::{AddressInfo, PostOffice, QueueConfig, ReplicatedMessage};
use crate::replay::{ReplayEngine, ReplayResult};
use crate::settle_pool::{CreditSource, DeliveryHandle, SettlePool, SettleToken};

/// Wraps the transport's credit source so every replenishment — whichever
/// path it settles through (demux after-complete, ack reconciliation, or a
/// committed replay transaction) — is reflected in [`MirrorMetrics`].
struct MeteredCredit {
    inner: Arc<dyn CreditSource>,
    metrics: Arc<MirrorMetrics>,
}

impl CreditSource for MeteredCredit {
    fn replenish(&self, units: u32) {
        self.inner.replenish(units);
        self.metrics.record_credit_consumed(u64::from(units));
    }
}

/// Inspects the `event_type` annotation (or its absence) and routes a
/// decoded [`InboundEvent`] to [`AdminApplier`], [`AckReconciler`], or
/// [`ReplayEngine`] (§4.1).
pub struct EventDemux {
    link: MirrorLinkConfig,
    post_office: Arc<dyn PostOffice>,
    pool: Arc<SettlePool>,
    credit: Arc<dyn CreditSource>,
    scope: ControllerScope,
    origin_caches: OriginCacheRegistry,
    admin: AdminApplier,
    replay: ReplayEngine,
    ack: AckReconciler,
    metrics: Arc<MirrorMetrics>,
}

impl EventDemux {
    pub fn new(
        link: MirrorLinkConfig,
        post_office: Arc<dyn PostOffice>,
        pool: Arc<SettlePool>,
        credit: Arc<dyn CreditSource>,
    ) -> Self {
        let capacity = link.credit_window;
        let metrics = Arc::new(MirrorMetrics::new());
        // Initial flow issues one full credit window (§6).
        metrics.record_credit_issued(capacity as u64);
        let credit: Arc<dyn CreditSource> = Arc::new(MeteredCredit {
            inner: credit,
            metrics: Arc::clone(&metrics),
        });
        Self {
            link,
            post_office,
            pool,
            credit,
            scope: ControllerScope::new(),
            origin_caches: OriginCacheRegistry::new(capacity),
            admin: AdminApplier::new(),
            replay: ReplayEngine::new(),
            ack: AckReconciler::new(),
            metrics,
        }
    }

    pub fn controller_scope(&self) -> &ControllerScope {
        &self.scope
    }

    pub fn metrics(&self) -> &MirrorMetrics {
        &self.metrics
    }

    /// Dispatches one decoded event. Enters [`ControllerScope`] for the
    /// duration, exits on every outcome via the guard's `Drop` (§4.7).
    ///
    /// On any thrown failure the event is logged and the token is still
    /// handed to the after-complete path — never dropped (§4.1, §7).
    #[instrument(skip_all, fields(kind = ?event.kind))]
    pub fn dispatch(&mut self, event: InboundEvent, delivery_handle: Box<dyn DeliveryHandle>) {
        let _scope_guard = self.scope.enter();

        let token = match self.pool.borrow(delivery_handle) {
            Ok(token) => token,
            Err(_handle) => {
                tracing::error!("settle pool exhausted; credit window misconfigured");
                return;
            }
        };

        match event.kind {
            EventKind::AddAddress | EventKind::DeleteAddress => {
                self.dispatch_address(event, token);
            }
            EventKind::CreateQueue => self.dispatch_create_queue(event, token),
            EventKind::DeleteQueue => self.dispatch_delete_queue(&event, token),
            EventKind::PostAck => self.dispatch_ack(&event, token),
            EventKind::DataMessage => self.dispatch_data_message(&event, token),
        }
    }

    fn settle_after_complete(&self, token: SettleToken) {
        token.settle_now(&self.pool, self.credit.as_ref());
    }

    fn parse_body<T: DeserializeOwned>(body: &str) -> MirrorResult<T> {
        serde_json::from_str(body).map_err(MirrorError::from)
    }

    fn dispatch_address(&mut self, event: InboundEvent, token: SettleToken) {
        let add = matches!(event.kind, EventKind::AddAddress);
        let result: MirrorResult<()> = (|| {
            let info: AddressInfo = Self::parse_body(&event.body)?;
            if add {
                self.admin.add_address(self.post_office.as_ref(), &info)
            } else {
                self.admin.delete_address(self.post_office.as_ref(), &info)
            }
        })();
        if let Err(err) = result {
            crate::admin::swallow_admin_failure("address event", &err);
        }
        self.settle_after_complete(token);
    }

    fn dispatch_create_queue(&mut self, event: InboundEvent, token: SettleToken) {
        let result: MirrorResult<()> = (|| {
            let cfg: QueueConfig = Self::parse_body(&event.body)?;
            self.admin.create_queue(self.post_office.as_ref(), &cfg)
        })();
        if let Err(err) = result {
            crate::admin::swallow_admin_failure("create queue event", &err);
        }
        self.settle_after_complete(token);
    }

    fn dispatch_delete_queue(&mut self, event: &InboundEvent, token: SettleToken) {
        let result: MirrorResult<()> = (|| {
            let address = event
                .annotations
                .get("address")
                .ok_or(MirrorError::MissingAnnotation("address"))?;
            let queue = event
                .annotations
                .get("queue")
                .ok_or(MirrorError::MissingAnnotation("queue"))?;
            self.admin.delete_queue(self.post_office.as_ref(), address, queue)
        })();
        if let Err(err) = result {
            crate::admin::swallow_admin_failure("delete queue event", &err);
        }
        self.settle_after_complete(token);
    }

    fn dispatch_ack(&mut self, event: &InboundEvent, token: SettleToken) {
        let broker_id = event.annotations.get("broker_id");
        let origin = OriginId::new(broker_id.unwrap_or(&self.link.remote_mirror_id));
        let Some(queue) = event.annotations.get("queue") else {
            crate::admin::swallow_admin_failure(
                "ack event",
                &MirrorError::MissingAnnotation("queue"),
            );
            self.settle_after_complete(token);
            return;
        };
        let reason = parse_ack_reason(event.annotations.get("ack_reason"));
        let internal_id = match event.body.trim().parse::<i64>() {
            Ok(raw) => InternalId::new(raw),
            Err(_) => {
                warn!("PostAck body is not a valid internal id, dropping");
                self.settle_after_complete(token);
                return;
            }
        };

        let ack = PendingAck {
            origin,
            internal_id,
            queue: queue.to_string(),
            reason,
        };
        let local_node_id = OriginId::new(self.link.remote_mirror_id.clone());
        match self.ack.reconcile(
            ack,
            token,
            self.post_office.as_ref(),
            local_node_id,
            Arc::clone(&self.pool),
            Arc::clone(&self.credit),
            Arc::clone(&self.metrics),
        ) {
            AckOutcome::Owned => {}
            AckOutcome::MissingQueue(token) => self.settle_after_complete(token),
        }
    }

    fn dispatch_data_message(&mut self, event: &InboundEvent, token: SettleToken) {
        let broker_id = event.annotations.get("broker_id");
        let origin = OriginId::new(broker_id.unwrap_or(&self.link.remote_mirror_id));
        let Some(internal_id) = event.annotations.internal_id() else {
            crate::admin::swallow_admin_failure(
                "data message",
                &MirrorError::MissingAnnotation("internal_id"),
            );
            self.settle_after_complete(token);
            return;
        };
        // The message's own address (its AMQP `to`), carried on this wire
        // model as an annotation for simplicity since decoding the actual
        // message properties is the transport collaborator's job (§1).
        let address = event.annotations.get("address").unwrap_or_default().to_string();
        let internal_destination = event.annotations.get("internal_destination").map(str::to_owned);
        let target_queues = event.annotations.target_queues();

        if matches!(event.format, BodyFormat::TunneledCore | BodyFormat::TunneledCoreLarge) {
            tracing::debug!(format = ?event.format, "tunneled core message format");
        }

        let message = ReplicatedMessage::new(address, origin, internal_id, bytes::Bytes::from(event.body.clone().into_bytes()));

        match self.replay.replay(
            message,
            internal_destination.as_deref(),
            target_queues.as_deref(),
            token,
            self.post_office.as_ref(),
            &mut self.origin_caches,
            &self.link,
            Arc::clone(&self.pool),
            Arc::clone(&self.credit),
        ) {
            ReplayResult::Routed => self.metrics.record_message_routed(),
            ReplayResult::Duplicate(token) => {
                self.metrics.record_duplicate_dropped();
                self.settle_after_complete(token);
            }
            ReplayResult::Failed(token, err) => {
                crate::admin::swallow_admin_failure("data message replay", &err);
                self.settle_after_complete(token);
            }
        }
    }
}

fn parse_ack_reason(raw: Option<&str>) -> AckReason {
    match raw {
        Some("Expired") => AckReason::Expired,
        Some("Killed") => AckReason::Killed,
        _ => AckReason::Normal,
    }
}
