//! Error types for livelink

use thiserror::Error;

/// Top-level error type for the collaborator layer
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Document error: {0}")]
    Dom(#[from] DomError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

/// Errors related to the transport channel of a view
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not joined: {0}")]
    NotJoined(String),

    #[error("Channel closed")]
    Closed,

    #[error("Push failed: {0}")]
    PushFailed(String),

    #[error("Push timed out: {0}")]
    Timeout(String),
}

/// Errors related to the wire envelopes the engine consumes
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown server message: {0}")]
    UnknownMessage(String),

    #[error("Malformed payload for {event}: {reason}")]
    MalformedPayload { event: String, reason: String },
}

/// Errors related to the live document
#[derive(Debug, Error)]
pub enum DomError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element detached: {0}")]
    Detached(u64),

    #[error("Missing attribute {attribute} on element {element}")]
    MissingAttribute { element: String, attribute: String },
}

/// Errors related to file uploads
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Entry rejected: {entry_ref} ({reason})")]
    Rejected { entry_ref: String, reason: String },

    #[error("No upload session for input {0}")]
    NoSession(u64),

    #[error("Upload transfer failed: {0}")]
    TransferFailed(String),
}

/// Result type alias for collaborator operations
pub type LiveResult<T> = Result<T, LiveError>;
