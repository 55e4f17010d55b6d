//! Wire-level data model: the decoded unit handed to [`crate::demux::EventDemux`].

use std::collections::HashMap;
use std::fmt;

/// Identity of the broker that originally produced an event.
///
/// Non-empty by construction; when absent on the wire, callers substitute
/// [`crate::config::MirrorLinkConfig::remote_mirror_id`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginId(String);

impl OriginId {
    /// Wraps a non-empty origin identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id` is empty — an empty origin id cannot participate in
    /// the `(OriginId, InternalId)` global identity pair.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(!id.is_empty(), "OriginId must be non-empty");
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 64-bit monotonically increasing identifier assigned by the origin.
///
/// `(OriginId, InternalId)` is the sole basis for duplicate detection and
/// for ack-to-reference matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(pub i64);

impl InternalId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reason a remote ack was issued, carried on `PostAck` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    Normal,
    Expired,
    Killed,
}

/// The recognized `event_type` annotation values, plus the implicit
/// `DataMessage` default when the annotation is absent (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AddAddress,
    DeleteAddress,
    CreateQueue,
    DeleteQueue,
    PostAck,
    DataMessage,
}

impl EventKind {
    /// Parses the `event_type` annotation value; unrecognized or absent
    /// values yield [`EventKind::DataMessage`] per §4.1.
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some("AddAddress") => Self::AddAddress,
            Some("DeleteAddress") => Self::DeleteAddress,
            Some("CreateQueue") => Self::CreateQueue,
            Some("DeleteQueue") => Self::DeleteQueue,
            Some("PostAck") => Self::PostAck,
            _ => Self::DataMessage,
        }
    }
}

/// The two tunneled body formats recognized at the wire boundary (§6),
/// tracked only for logging/metrics tagging — decoding itself is the
/// transport collaborator's job (out of scope per §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    TunneledCore,
    TunneledCoreLarge,
    Default,
}

/// Key→value annotation mapping recognized on the wire (§3).
#[derive(Debug, Clone, Default)]
pub struct Annotations(HashMap<String, String>);

impl Annotations {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// `target_queues` is carried as a comma-separated list on the wire
    /// annotation map; absent entirely when the origin performs normal
    /// address routing (§4.3 step 9).
    pub fn target_queues(&self) -> Option<Vec<String>> {
        self.get("target_queues")
            .map(|raw| raw.split(',').map(str::to_owned).collect())
    }

    pub fn internal_id(&self) -> Option<InternalId> {
        self.get("internal_id")
            .and_then(|v| v.parse::<i64>().ok())
            .map(InternalId)
    }
}

/// A decoded unit from the mirror stream (§3).
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub annotations: Annotations,
    pub body: String,
    pub format: BodyFormat,
}

impl InboundEvent {
    pub fn new(kind: EventKind, annotations: Annotations, body: impl Into<String>) -> Self {
        Self {
            kind,
            annotations,
            body: body.into(),
            format: BodyFormat::Default,
        }
    }

    pub fn with_format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }
}
