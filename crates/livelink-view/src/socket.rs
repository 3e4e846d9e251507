//! The live socket
//!
//! [`LiveSocket`] owns the document, the view tree and every collaborator.
//! It is sans-IO: inbound channel events, upload reports and user actions
//! are handed to it one at a time, and every outbound effect goes through
//! the collaborator traits. Nothing blocks; a push records what to do with
//! its reply in the pushing node, keyed by the push's [`PushRef`].
//!
//! The handling code is split by concern:
//!
//! - `lifecycle`: join choreography, close/error handling, destroy
//! - `render`: diff application, patching, component pruning, unlocking
//! - `events`: pushes, replies, user actions, uploads, live navigation
//!
//! [`SocketDriver`](crate::SocketDriver) runs a socket on a tokio task.

use std::collections::HashMap;
use std::time::Instant;

use livelink_core::constants::{PHX_PARENT_ID, PHX_SESSION, PHX_STATIC, PHX_VIEW};
use livelink_core::{
    Channel, ChannelEvent, ChannelEventKind, ChannelFactory, Clock, ComponentId, Dom, HookRegistry,
    Navigator, NodeId, PushRef, RenderedFactory, ServerMessage, SystemClock, UploadAdapter, ViewId,
    ViewMarker,
};
use livelink_logging::ViewContextGuard;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Bindings, SocketConfig};
use crate::error::{ViewError, ViewResult};
use crate::hooks::ViewHooks;
use crate::timers::{TimerKind, TimerQueue};
use crate::tree::ViewTree;
use crate::view::{ReplyAction, ViewNode};

/// A live navigation waiting for its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub id: u64,
    pub href: String,
}

/// What is left of a destroyed view until its leave completes
pub(crate) struct LeaveCleanup {
    pub view: ViewId,
    pub channel: Box<dyn Channel>,
    pub hooks: ViewHooks,
    pub uploads: Vec<NodeId>,
}

/// Client-side engine for every live view of one document
pub struct LiveSocket<D: Dom> {
    pub(crate) config: SocketConfig,
    pub(crate) bindings: Bindings,
    pub(crate) dom: D,
    pub(crate) channels: Box<dyn ChannelFactory>,
    pub(crate) rendered: Box<dyn RenderedFactory>,
    pub(crate) navigator: Box<dyn Navigator>,
    pub(crate) uploader: Option<Box<dyn UploadAdapter>>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) hooks: HookRegistry,
    pub(crate) tree: ViewTree,
    pub(crate) timers: TimerQueue,
    pub(crate) leaving: HashMap<(String, PushRef), LeaveCleanup>,
    pub(crate) pending_link: Option<PendingLink>,
    pub(crate) link_counter: u64,
    pub(crate) main: Option<ViewId>,
    pub(crate) instance_id: Uuid,
}

impl<D: Dom> std::fmt::Debug for LiveSocket<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSocket")
            .field("views", &self.tree.ids())
            .field("main", &self.main)
            .field("pending_link", &self.pending_link)
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`LiveSocket`]
///
/// Channels, rendering models and a navigator are required. The clock
/// defaults to [`SystemClock`]; without an upload adapter, authorized
/// uploads fail.
pub struct LiveSocketBuilder<D: Dom> {
    dom: D,
    config: SocketConfig,
    channels: Option<Box<dyn ChannelFactory>>,
    rendered: Option<Box<dyn RenderedFactory>>,
    navigator: Option<Box<dyn Navigator>>,
    uploader: Option<Box<dyn UploadAdapter>>,
    clock: Option<Box<dyn Clock>>,
    hooks: HookRegistry,
}

impl<D: Dom> LiveSocketBuilder<D> {
    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn channels(mut self, channels: Box<dyn ChannelFactory>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn rendered(mut self, rendered: Box<dyn RenderedFactory>) -> Self {
        self.rendered = Some(rendered);
        self
    }

    pub fn navigator(mut self, navigator: Box<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn uploads(mut self, uploader: Box<dyn UploadAdapter>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the socket
    pub fn build(self) -> ViewResult<LiveSocket<D>> {
        let channels = self
            .channels
            .ok_or_else(|| ViewError::Config("channel factory is required".to_string()))?;
        let rendered = self
            .rendered
            .ok_or_else(|| ViewError::Config("rendered factory is required".to_string()))?;
        let navigator = self
            .navigator
            .ok_or_else(|| ViewError::Config("navigator is required".to_string()))?;
        if self.config.binding_prefix.is_empty() {
            return Err(ViewError::Config("binding prefix must not be empty".to_string()));
        }

        Ok(LiveSocket {
            bindings: self.config.bindings(),
            config: self.config,
            dom: self.dom,
            channels,
            rendered,
            navigator,
            uploader: self.uploader,
            clock: self.clock.unwrap_or_else(|| Box::new(SystemClock)),
            hooks: self.hooks,
            tree: ViewTree::new(),
            timers: TimerQueue::new(),
            leaving: HashMap::new(),
            pending_link: None,
            link_counter: 0,
            main: None,
            instance_id: Uuid::new_v4(),
        })
    }
}

impl<D: Dom> LiveSocket<D> {
    /// Start building a socket over `dom`
    pub fn builder(dom: D) -> LiveSocketBuilder<D> {
        LiveSocketBuilder {
            dom,
            config: SocketConfig::default(),
            channels: None,
            rendered: None,
            navigator: None,
            uploader: None,
            clock: None,
            hooks: HookRegistry::new(),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn dom(&self) -> &D {
        &self.dom
    }

    /// Mutable access to the document, for simulating user input
    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    pub fn tree(&self) -> &ViewTree {
        &self.tree
    }

    pub fn view(&self, id: &ViewId) -> Option<&ViewNode> {
        self.tree.get(id)
    }

    /// The view live navigation applies to
    pub fn main(&self) -> Option<&ViewId> {
        self.main.as_ref()
    }

    /// Href of the live navigation in flight
    pub fn pending_link(&self) -> Option<&str> {
        self.pending_link.as_ref().map(|link| link.href.as_str())
    }

    /// Session instance id attached to log lines
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Earliest timer deadline, if any timer is scheduled
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// View owning `el`: the nearest enclosing live container
    pub fn owner(&self, el: NodeId) -> Option<ViewId> {
        let container = self.dom.closest_with_attr(el, PHX_SESSION)?;
        let id = ViewId::new(self.dom.attribute(container, "id")?);
        self.tree.contains(&id).then_some(id)
    }

    /// Handle one inbound channel event
    ///
    /// Failures are logged and turned into view state; nothing propagates.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        let ChannelEvent { topic, kind } = event;

        if let ChannelEventKind::Reply { push_ref, .. } = &kind {
            if let Some(cleanup) = self.leaving.remove(&(topic.clone(), *push_ref)) {
                self.finish_leave(cleanup);
                return;
            }
        }

        let Some(id) = self.tree.by_topic(&topic) else {
            debug!(topic = %topic, "Dropping event for unknown topic");
            return;
        };
        let root = self
            .tree
            .get(&id)
            .map(|node| node.root.clone())
            .unwrap_or_else(|| id.clone());
        let _context = ViewContextGuard::with_root(&id, &root, self.instance_id);

        match kind {
            ChannelEventKind::Reply { push_ref, outcome } => {
                let action = self
                    .tree
                    .get_mut(&id)
                    .and_then(|node| node.replies.remove(&push_ref));
                match action {
                    Some(action) => self.on_reply(&id, action, outcome),
                    None => debug!(view = %id, push_ref = %push_ref, "Reply without pending push"),
                }
            }
            ChannelEventKind::Message { event, payload } => {
                match ServerMessage::parse(&event, payload) {
                    Ok(message) => self.on_message(&id, message),
                    Err(e) => warn!(view = %id, event = %event, error = %e, "Ignoring server message"),
                }
            }
            ChannelEventKind::Close { reason } => self.on_close(&id, &reason),
            ChannelEventKind::Error { reason } => self.on_error(&id, &reason),
        }
    }

    /// Run every timer due at the clock's current time
    pub fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        for timer in self.timers.pop_due(now) {
            let view = timer.view().clone();
            let root = self
                .tree
                .get(&view)
                .map(|node| node.root.clone())
                .unwrap_or_else(|| view.clone());
            let _context = ViewContextGuard::with_root(&view, &root, self.instance_id);
            match timer {
                TimerKind::Loader(view) => self.on_loader_timeout(&view),
                TimerKind::Reconnect { view, join_count } => self.on_reconnect_timer(&view, join_count),
            }
        }
    }

    fn on_reply(&mut self, id: &ViewId, action: ReplyAction, outcome: livelink_core::ReplyOutcome) {
        match action {
            ReplyAction::Join => self.on_join_reply(id, outcome),
            ReplyAction::Event(pending) => self.on_event_reply(id, pending, outcome),
            ReplyAction::WillDestroy(cids) => self.on_will_destroy_reply(id, cids, outcome),
            ReplyAction::Destroyed(cids) => self.on_destroyed_reply(id, cids, outcome),
        }
    }

    pub(crate) fn ensure_connected(&self, id: &ViewId) -> ViewResult<()> {
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| ViewError::ViewNotFound(id.clone()))?;
        if node.is_connected() {
            Ok(())
        } else {
            Err(ViewError::NotConnected(id.clone()))
        }
    }

    /// View marker read from a container element of the document
    pub(crate) fn marker_of(&self, el: NodeId) -> Option<ViewMarker> {
        let id = self.dom.attribute(el, "id").filter(|id| !id.is_empty())?;
        let session = self.dom.attribute(el, PHX_SESSION)?;
        Some(ViewMarker {
            id: ViewId::new(id),
            view: self.dom.attribute(el, PHX_VIEW),
            session,
            static_token: self.dom.attribute(el, PHX_STATIC).filter(|s| !s.is_empty()),
        })
    }

    /// Component containers of `cid` rendered by view `id`
    pub(crate) fn component_containers(&self, id: &ViewId, cid: ComponentId) -> Vec<NodeId> {
        let Some(el) = self.tree.get(id).and_then(|node| node.el) else {
            return Vec::new();
        };
        let cid = cid.to_string();
        owned_elements(&self.dom, el)
            .into_iter()
            .filter(|node| {
                self.dom
                    .attribute(*node, livelink_core::constants::PHX_COMPONENT)
                    .as_deref()
                    == Some(cid.as_str())
            })
            .collect()
    }
}

/// Elements of a container that belong to its view
///
/// Nested view containers are included, their contents are not.
pub(crate) fn owned_elements(dom: &dyn Dom, container: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = dom.children(container).into_iter().rev().collect();
    while let Some(el) = stack.pop() {
        out.push(el);
        if dom.has_attribute(el, PHX_SESSION) {
            continue;
        }
        stack.extend(dom.children(el).into_iter().rev());
    }
    out
}

/// True if `el` belongs to view `id`
pub(crate) fn owns_element(dom: &dyn Dom, id: &ViewId, el: NodeId) -> bool {
    if dom.attribute(el, PHX_PARENT_ID).as_deref() == Some(id.as_str()) {
        return true;
    }
    dom.closest_with_attr(el, PHX_SESSION)
        .and_then(|container| dom.attribute(container, "id"))
        .is_some_and(|owner| owner == id.as_str())
}

/// Resolve a root-relative url against the current page url
pub(crate) fn expand_url(current: &str, to: &str) -> String {
    if !to.starts_with('/') {
        return to.to_string();
    }
    let Some(scheme_end) = current.find("://") else {
        return to.to_string();
    };
    let authority_start = scheme_end + 3;
    let origin_end = current[authority_start..]
        .find('/')
        .map_or(current.len(), |i| authority_start + i);
    format!("{}{}", &current[..origin_end], to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_core::{
        MarkupElement, MarkupRenderedFactory, MemoryDom, MockChannelHub, RecordingNavigator,
    };

    #[test]
    fn test_expand_url() {
        assert_eq!(
            expand_url("https://example.com/users?page=2", "/posts"),
            "https://example.com/posts"
        );
        assert_eq!(expand_url("http://localhost:4000", "/a"), "http://localhost:4000/a");
        assert_eq!(
            expand_url("https://example.com/x", "https://other.org/y"),
            "https://other.org/y"
        );
        assert_eq!(expand_url("not a url", "/a"), "/a");
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = LiveSocket::builder(MemoryDom::new()).build();
        assert!(matches!(result, Err(ViewError::Config(_))));

        let hub = MockChannelHub::new();
        let socket = LiveSocket::builder(MemoryDom::new())
            .channels(hub.factory())
            .rendered(Box::new(MarkupRenderedFactory))
            .navigator(RecordingNavigator::new("http://localhost/").boxed())
            .build()
            .unwrap();
        assert!(socket.tree().is_empty());
        assert!(socket.main().is_none());
    }

    #[test]
    fn test_owned_elements_skip_nested_views() {
        let mut dom = MemoryDom::new();
        let body = dom.body();
        let root = dom.append(
            body,
            &MarkupElement::new("div")
                .with_attr("id", "root")
                .with_attr(PHX_SESSION, "s")
                .with_child(MarkupElement::new("p").with_attr("id", "mine"))
                .with_child(
                    MarkupElement::new("div")
                        .with_attr("id", "child")
                        .with_attr(PHX_SESSION, "c")
                        .with_attr(PHX_PARENT_ID, "root")
                        .with_child(MarkupElement::new("p").with_attr("id", "theirs")),
                ),
        );
        let mine = dom.element_by_id("mine").unwrap();
        let child = dom.element_by_id("child").unwrap();
        let theirs = dom.element_by_id("theirs").unwrap();

        let owned = owned_elements(&dom, root);
        assert_eq!(owned, vec![mine, child]);

        let root_id = ViewId::new("root");
        assert!(owns_element(&dom, &root_id, mine));
        assert!(owns_element(&dom, &root_id, child));
        assert!(!owns_element(&dom, &root_id, theirs));
        assert!(owns_element(&dom, &ViewId::new("child"), theirs));
    }
}
