//! Link-level configuration.

/// Configuration for a single mirror replication link.
///
/// Sizes the two structures that must never overflow within a round of
/// in-flight messages (the [`crate::origin_cache::DuplicateIdCache`] and the
/// [`crate::settle_pool::SettlePool`]), and carries the identity
/// substitutions the source's wire protocol leaves implicit.
#[derive(Debug, Clone)]
pub struct MirrorLinkConfig {
    /// Initial (and only, per §6: "Initial flow issues one full credit
    /// window") credit window for this link. Also the capacity of every
    /// per-origin duplicate-ID cache and of the settle token pool.
    pub credit_window: usize,

    /// Identity substituted for an absent `broker_id` annotation, both on
    /// [`crate::event::EventKind::DataMessage`] (§4.3 step 2) and on
    /// `PostAck` (§4.1, §9 open question 2).
    pub remote_mirror_id: String,

    /// Prefix used to key the durable per-origin cache:
    /// `"<mirror_namespace>_<originId>"` (§6).
    pub mirror_namespace: String,
}

impl MirrorLinkConfig {
    /// Creates a new link configuration.
    ///
    /// # Panics
    ///
    /// Panics if `credit_window` is 0 — a zero-capacity cache or pool can
    /// never admit a single in-flight message.
    pub fn new(
        credit_window: usize,
        remote_mirror_id: impl Into<String>,
        mirror_namespace: impl Into<String>,
    ) -> Self {
        assert!(credit_window > 0, "credit_window must be positive");
        Self {
            credit_window,
            remote_mirror_id: remote_mirror_id.into(),
            mirror_namespace: mirror_namespace.into(),
        }
    }

    /// The durable cache key for a given origin, per §6.
    pub fn cache_key(&self, origin: &str) -> String {
        format!("{}_{}", self.mirror_namespace, origin)
    }

    /// Configuration suited to unit/property tests: a small credit window.
    pub fn testing() -> Self {
        Self::new(16, "remote-mirror", "mirror")
    }
}
