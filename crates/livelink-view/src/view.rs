//! View node state

use std::collections::{HashMap, VecDeque};

use livelink_core::{
    Channel, ComponentId, DiffEnvelope, NodeId, PageLoading, PushRef, RefToken, Rendered,
    ServerMessage, ViewId, ViewMarker,
};

use crate::backoff::ReconnectBackoff;
use crate::forms::{RecoveryQueue, SubmitQueue};
use crate::hooks::ViewHooks;
use crate::pruning::ComponentPruner;
use crate::ref_lock::RefLock;
use crate::timers::TimerId;
use crate::tree::JoinPatch;
use crate::upload::UploadCoordinator;

/// Lifecycle state of a view node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Created, join not sent yet
    Constructing,
    /// Join sent, waiting for the mount reply
    JoinRequested,
    /// Mount reply received; waiting for form recovery or nested joins
    JoinPending,
    /// Steady state
    Joined,
    /// Channel closed
    Disconnected,
    /// Transport error
    Errored,
}

/// Inbound work held back while a join or navigation is pending
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Deferred {
    Diff(DiffEnvelope),
    Message(ServerMessage),
}

/// What to do with the reply to an outstanding push
pub(crate) enum ReplyAction {
    Join,
    Event(PendingEvent),
    /// First pruning phase for these candidates
    WillDestroy(Vec<ComponentId>),
    /// Second pruning phase
    Destroyed(Vec<ComponentId>),
}

/// An event push waiting for its reply
pub(crate) struct PendingEvent {
    pub token: Option<RefToken>,
    pub loading: Option<PageLoading>,
    pub then: FollowUp,
}

/// Work that continues once an event reply arrives
pub(crate) enum FollowUp {
    None,
    /// Deliver the reply to the hook that pushed the event
    HookReply { el: NodeId, token: RefToken },
    /// Change event of an input; may start an auto-upload and continue a
    /// form recovery chain
    Input {
        input: NodeId,
        cid: Option<ComponentId>,
        recovering: bool,
    },
    /// Preflight of an upload input
    Preflight { input: NodeId },
    /// Live navigation
    Link { link_id: u64, href: String },
}

/// A join gated on the replay of recovered forms
pub(crate) struct Recovery {
    pub forms: RecoveryQueue,
    pub join: JoinPatch,
}

/// One live view bound to a container element and a channel
pub struct ViewNode {
    pub(crate) id: ViewId,
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<ViewId>,
    pub(crate) root: ViewId,
    pub(crate) el: Option<NodeId>,
    pub(crate) session: String,
    pub(crate) static_token: Option<String>,
    pub(crate) href: Option<String>,
    pub(crate) flash: Option<String>,
    pub(crate) state: ViewState,
    pub(crate) join_count: u32,
    pub(crate) child_joins: u32,
    pub(crate) awaiting_ack: bool,
    pub(crate) channel: Box<dyn Channel>,
    pub(crate) rendered: Option<Box<dyn Rendered>>,
    pub(crate) locks: RefLock,
    pub(crate) pruner: ComponentPruner,
    pub(crate) hooks: ViewHooks,
    pub(crate) uploads: UploadCoordinator,
    pub(crate) submits: SubmitQueue,
    pub(crate) deferred: VecDeque<Deferred>,
    pub(crate) recovery: Option<Recovery>,
    pub(crate) replies: HashMap<PushRef, ReplyAction>,
    pub(crate) loader_timer: Option<TimerId>,
    /// The disconnected state is on display
    pub(crate) loader_shown: bool,
    pub(crate) reconnect_timer: Option<TimerId>,
    pub(crate) backoff: ReconnectBackoff,
    pub(crate) page_loading: Option<PageLoading>,
}

impl std::fmt::Debug for ViewNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewNode")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("root", &self.root)
            .field("state", &self.state)
            .field("join_count", &self.join_count)
            .field("child_joins", &self.child_joins)
            .finish_non_exhaustive()
    }
}

impl ViewNode {
    pub(crate) fn new(
        marker: ViewMarker,
        parent: Option<ViewId>,
        root: ViewId,
        el: Option<NodeId>,
        channel: Box<dyn Channel>,
    ) -> Self {
        Self {
            id: marker.id,
            name: marker.view,
            parent,
            root,
            el,
            session: marker.session,
            static_token: marker.static_token,
            href: None,
            flash: None,
            state: ViewState::Constructing,
            join_count: 0,
            child_joins: 0,
            awaiting_ack: false,
            channel,
            rendered: None,
            locks: RefLock::new(),
            pruner: ComponentPruner::new(),
            hooks: ViewHooks::new(),
            uploads: UploadCoordinator::new(),
            submits: SubmitQueue::new(),
            deferred: VecDeque::new(),
            recovery: None,
            replies: HashMap::new(),
            loader_timer: None,
            loader_shown: false,
            reconnect_timer: None,
            backoff: ReconnectBackoff::new(),
            page_loading: None,
        }
    }

    pub fn id(&self) -> &ViewId {
        &self.id
    }

    /// View type name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> Option<&ViewId> {
        self.parent.as_ref()
    }

    pub fn root(&self) -> &ViewId {
        &self.root
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Container element, once attached
    pub fn el(&self) -> Option<NodeId> {
        self.el
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    /// Number of completed joins
    pub fn join_count(&self) -> u32 {
        self.join_count
    }

    /// Nested joins this node still waits for
    pub fn child_joins(&self) -> u32 {
        self.child_joins
    }

    /// True until the join patch of the current join has been applied
    pub fn is_join_pending(&self) -> bool {
        matches!(
            self.state,
            ViewState::Constructing | ViewState::JoinRequested | ViewState::JoinPending
        )
    }

    pub fn is_connected(&self) -> bool {
        self.channel.can_push()
    }

    /// Diffs and messages queued until the node may apply them
    pub fn deferred_updates(&self) -> usize {
        self.deferred.len()
    }

    /// True while recovered forms are being replayed
    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    /// Component ids announced for pruning and not yet settled
    pub fn pruning_candidates(&self) -> Vec<ComponentId> {
        self.pruner.pending()
    }

    /// True if a submit of `form` is waiting for uploads
    pub fn has_scheduled_submit(&self, form: NodeId) -> bool {
        self.submits.is_scheduled(form)
    }

    /// Elements with a live hook
    pub fn hooked_elements(&self) -> Vec<NodeId> {
        self.hooks.elements()
    }

    /// Lock tokens whose operation is still in flight
    pub fn outstanding_locks(&self) -> Vec<RefToken> {
        self.locks.outstanding().collect()
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }
}
