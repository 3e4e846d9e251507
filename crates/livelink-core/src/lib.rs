//! # Livelink Core
//!
//! Collaborator contracts, markup and wire types for the livelink view engine.
//!
//! The engine in `livelink-view` is written against the traits in this crate,
//! so the same view lifecycle runs against a real transport and document or
//! against the in-memory implementations shipped here for tests.
//!
//! ## Key Traits
//!
//! - [`Channel`] / [`ChannelFactory`]: push-based transport channel per view topic
//! - [`Dom`]: the live document plus its reconciler, reporting through [`PatchObserver`]
//! - [`Rendered`] / [`RenderedFactory`]: diff-merge rendering model of one view
//! - [`Hook`]: element behavior receiving lifecycle callbacks
//! - [`UploadAdapter`], [`Navigator`], [`Clock`]: remaining page-level effects
//!
//! ## Key Types
//!
//! - [`ViewId`], [`NodeId`], [`ComponentId`], [`RefToken`], [`PushRef`]
//! - [`Markup`]: structured fragment produced by a rendering model
//! - [`DiffEnvelope`], [`JoinFailure`], [`PushReply`], [`ServerMessage`]: wire envelopes
//!
//! ## Test Collaborators
//!
//! [`MockChannelHub`], [`MemoryDom`], [`MarkupRenderedFactory`],
//! [`RecordingNavigator`], [`RecordingUploadAdapter`], [`ManualClock`]

pub mod error;
pub mod identity;
pub mod constants;
pub mod markup;
pub mod protocol;
pub mod channel;
pub mod dom;
pub mod traits;
pub mod hook;
pub mod mock_channel;
pub mod memory_dom;
pub mod mock_rendered;
pub mod recording;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use markup::*;
pub use protocol::*;
pub use channel::*;
pub use dom::*;
pub use traits::*;
pub use hook::*;
pub use mock_channel::*;
pub use memory_dom::*;
pub use mock_rendered::*;
pub use recording::*;
