//! # mirror-replica: replication target for a broker-to-broker mirror link
//!
//! This crate implements the *receiving* side of a one-way mirror: a stream
//! of address/queue admin events, data messages, and remote acks arrives
//! from an origin broker, and this crate decides what to do with each one.
//!
//! ## Architecture
//!
//! ```text
//!   InboundEvent ──▶ EventDemux::dispatch
//!                        │
//!         ┌──────────────┼────────────────┬───────────────┐
//!         ▼              ▼                ▼               ▼
//!   AdminApplier   ReplayEngine     AckReconciler     (settle directly)
//!    (§4.2)         (§4.3)           (§4.4)
//!         │              │                │
//!         ▼              ▼                ▼
//!    PostOffice      OriginCacheRegistry  Queue
//!   (collaborator)    + SettlePool        (collaborator)
//! ```
//!
//! - [`event`]: the decoded wire model (`InboundEvent`, `EventKind`, `OriginId`, `InternalId`)
//! - [`demux`]: [`demux::EventDemux`], the entry point that routes a decoded event
//! - [`admin`]: idempotent application of address/queue admin events
//! - [`replay`]: exactly-once routing of data messages
//! - [`ack_reconciler`]: the tiered (direct / flush-retry / paged) ack lookup
//! - [`origin_cache`]: per-origin duplicate-ID tracking
//! - [`settle_pool`]: the bounded pool of settlement tokens bound to link credit
//! - [`controller_scope`]: the RAII guard that suppresses mirror-loop re-emission
//! - [`postoffice`], [`queue`], [`transaction`]: the external-collaborator traits
//!   implemented by the embedding broker
//! - [`config`]: per-link configuration
//! - [`metrics`]: ambient replication counters
//! - [`error`]: the crate-wide error type
//!
//! Everything the surrounding broker owns — the transport, wire codec, and
//! the concrete address/queue/transaction implementations — is abstracted
//! behind the traits in [`postoffice`], [`queue`], and [`transaction`]; this
//! crate depends on their behavior, not on any one broker's internals.

pub mod ack_reconciler;
pub mod admin;
pub mod config;
pub mod controller_scope;
pub mod demux;
pub mod error;
pub mod event;
pub mod metrics;
pub mod origin_cache;
pub mod postoffice;
pub mod queue;
pub mod replay;
pub mod settle_pool;
pub mod transaction;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::MirrorLinkConfig;
pub use demux::EventDemux;
pub use error::{MirrorError, MirrorResult};
pub use event::{Annotations, BodyFormat, EventKind, InboundEvent, InternalId, OriginId};
pub use metrics::MirrorMetrics;
