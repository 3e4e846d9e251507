//! Collaborator traits consumed by the view engine
//!
//! - [`Rendered`]: the diff-merge rendering model of one view
//! - [`UploadAdapter`]: moves authorized file entries to their destination
//! - [`Navigator`]: page-level effects (history, redirects, window events)
//! - [`Clock`]: time abstraction for testability

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dom::FileInfo;
use crate::identity::{ComponentId, NodeId, ViewId};
use crate::markup::Markup;
use crate::protocol::NavKind;

/// Rendering model of a single view
///
/// Owned exclusively by its view node.
pub trait Rendered: Send {
    /// Merge a diff body into the model
    fn merge_diff(&mut self, diff: &Value);

    /// Materialize the view's container contents
    ///
    /// With `Some(cids)`, only the listed components are rendered in full;
    /// the others are emitted as skip markers the reconciler leaves alone.
    fn to_markup(&self, only_cids: Option<&[ComponentId]>) -> Markup;

    /// Materialize the contents of a single component container
    fn component_to_markup(&self, cid: ComponentId) -> Markup;

    /// Component ids a diff touches
    fn component_ids(&self, diff: &Value) -> Vec<ComponentId>;

    /// True if the diff only touches nested components
    fn is_component_only_diff(&self, diff: &Value) -> bool;

    /// Forget the state of the given components
    fn prune_ids(&mut self, cids: &[ComponentId]);
}

/// Builds a fresh rendering model from a mount diff
pub trait RenderedFactory: Send {
    fn build(&self, view: &ViewId, diff: &Value) -> Box<dyn Rendered>;
}

/// One file entry authorized for transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub entry_ref: String,
    pub file: FileInfo,
    /// Per-entry metadata returned by the preflight
    pub meta: Value,
}

/// An upload transfer request handed to the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTransfer {
    pub view: ViewId,
    pub input: NodeId,
    /// Join generation the transfer belongs to
    pub join_count: u32,
    /// Upload configuration returned by the preflight
    pub config: Value,
    pub entries: Vec<TransferEntry>,
}

/// Progress reported by an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum UploadReportKind {
    /// Entry progress in percent
    Progress { entry_ref: String, progress: u8 },
    /// The transfer failed
    Error { reason: String },
}

/// A report addressed to the view and input that started the transfer
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub view: ViewId,
    pub input: NodeId,
    pub join_count: u32,
    pub kind: UploadReportKind,
}

/// Transfers authorized file entries
pub trait UploadAdapter: Send {
    /// Begin a transfer; progress comes back as [`UploadReport`]s
    fn start(&mut self, transfer: UploadTransfer);

    /// Abandon any transfer of `input`
    fn cancel(&mut self, _view: &ViewId, _input: NodeId) {}
}

/// Kind of a page-loading notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLoadingKind {
    Initial,
    Element,
    Error,
}

/// Page-loading notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLoading {
    pub kind: PageLoadingKind,
    pub to: Option<String>,
    pub target: Option<NodeId>,
}

/// Page-level effects
pub trait Navigator: Send {
    /// Full page redirect
    fn redirect(&mut self, to: &str, flash: Option<&str>);

    /// Navigate to another live view
    fn live_redirect(&mut self, to: &str, kind: NavKind, flash: Option<&str>);

    /// Push or replace the current history entry
    fn history_patch(&mut self, to: &str, kind: NavKind);

    /// Reload the page
    fn reload(&mut self);

    fn page_loading_start(&mut self, info: PageLoading);

    fn page_loading_stop(&mut self, info: PageLoading);

    /// Dispatch a window event (`phx:hook:<name>`)
    fn dispatch_event(&mut self, name: &str, detail: &Value);

    fn put_title(&mut self, title: &str);

    /// Current page url
    fn current_url(&self) -> String;

    /// True while the page is unloading
    fn is_unloaded(&self) -> bool {
        false
    }

    /// User connect params for a view
    fn connect_params(&self, _view_name: Option<&str>) -> Map<String, Value> {
        Map::new()
    }

    /// A root view and its whole subtree finished joining
    fn joined(&mut self, _view: &ViewId, _join_count: u32) {}
}

/// Time abstraction for testability
pub trait Clock: Send + Sync {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real clock
///
/// Reads tokio's clock so paused-time tests advance it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
