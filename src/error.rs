//! Crate-wide error type.

use thiserror::Error;

/// Result type for mirror replication operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors surfaced across the external-collaborator boundary.
///
/// Per the error handling design, the idempotent "treat as success" cases
/// (unknown address/queue on delete, queue-already-exists on create, missing
/// target queue on ack, missing reference after all retry stages) never
/// become this type — they are folded into a success return value by the
/// subsystem that would otherwise raise them. Only genuine failures reach
/// [`crate::demux::EventDemux`].
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The post-office rejected an administrative or routing request.
    #[error("post-office error: {0}")]
    PostOffice(String),

    /// A queue operation failed for a reason other than "not found".
    #[error("queue error: {0}")]
    Queue(String),

    /// Routing a replayed message failed.
    #[error("routing error: {0}")]
    Routing(String),

    /// The replay transaction could not be committed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The administrative body failed to parse as JSON.
    #[error("malformed administrative payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// An annotation required for this event kind was missing from the wire.
    #[error("missing required annotation: {0}")]
    MissingAnnotation(&'static str),
}

impl MirrorError {
    /// True if this error originated in the post-office collaborator.
    pub fn is_post_office(&self) -> bool {
        matches!(self, Self::PostOffice(_))
    }
}
