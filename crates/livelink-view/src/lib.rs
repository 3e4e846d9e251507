//! # Livelink View
//!
//! Client-side engine for server-rendered live views.
//!
//! A [`LiveSocket`] owns a tree of view nodes, one per live container in the
//! document. Each node joins its own channel topic, merges the server's diffs
//! into a rendering model, and patches its container. While a push is in
//! flight the elements it concerns are locked so that a server update cannot
//! clobber what the user is editing.
//!
//! The engine is sans-IO: it reacts to [`ChannelEvent`]s, user actions,
//! upload reports and timer deadlines. [`SocketDriver`] runs it on tokio.
//!
//! ## Example
//!
//! ```ignore
//! use livelink_view::{LiveSocket, SocketDriver, SocketConfig};
//!
//! let socket = LiveSocket::builder(dom)
//!     .config(SocketConfig::default())
//!     .channels(transport.factory())
//!     .rendered(Box::new(rendering))
//!     .navigator(Box::new(browser))
//!     .build()?;
//!
//! let (driver, handle) = SocketDriver::new(socket);
//! tokio::spawn(driver.run());
//! handle.action(UserAction::ConnectRoot { id: ViewId::new("phx-root"), flash: None })?;
//! ```
//!
//! [`ChannelEvent`]: livelink_core::ChannelEvent

pub mod backoff;
pub mod config;
pub mod driver;
pub mod error;
pub mod forms;
pub mod hooks;
pub mod pruning;
pub mod ref_lock;
pub mod socket;
pub mod timers;
pub mod tree;
pub mod upload;
pub mod view;

mod events;
mod lifecycle;
mod render;

// Re-export main types
pub use backoff::ReconnectBackoff;
pub use config::{Bindings, DEFAULT_BINDING_PREFIX, ReconnectConfig, SocketConfig};
pub use driver::{SocketDriver, SocketHandle, SocketInput, UserAction};
pub use error::{LockError, ViewError, ViewResult};
pub use ref_lock::RefLock;
pub use socket::{LiveSocket, LiveSocketBuilder, PendingLink};
pub use tree::ViewTree;
pub use upload::{EntryStatus, UploadCoordinator, UploadEntry, UploadSession};
pub use view::{ViewNode, ViewState};
