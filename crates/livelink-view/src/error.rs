//! Error types for the view engine

use livelink_core::{ChannelError, DomError, LiveError, NodeId, RefToken, ViewId};
use thiserror::Error;

/// Errors returned by user-action entry points
#[derive(Debug, Error)]
pub enum ViewError {
    /// No live view with this id
    #[error("View not found: {0}")]
    ViewNotFound(ViewId),

    /// The view's channel cannot push
    #[error("View not connected: {0}")]
    NotConnected(ViewId),

    /// A referenced element is missing or not owned by a live view
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A view with this id is already live
    #[error("View already joined: {0}")]
    AlreadyJoined(ViewId),

    /// No main view is connected
    #[error("No main view")]
    NoMainView,

    /// The driver task is gone
    #[error("Socket driver stopped")]
    DriverStopped,

    /// Element locking failed
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The socket was built without a required collaborator
    #[error("Configuration error: {0}")]
    Config(String),

    /// Collaborator or protocol failure
    #[error("Core error: {0}")]
    Core(#[from] LiveError),
}

impl From<ChannelError> for ViewError {
    fn from(e: ChannelError) -> Self {
        ViewError::Core(e.into())
    }
}

impl From<DomError> for ViewError {
    fn from(e: DomError) -> Self {
        ViewError::Core(e.into())
    }
}

/// Element lock errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The element already carries a lock token
    #[error("Element {element} already locked by {token}")]
    AlreadyLocked { element: NodeId, token: RefToken },
}

/// Result type for view engine operations
pub type ViewResult<T> = Result<T, ViewError>;
