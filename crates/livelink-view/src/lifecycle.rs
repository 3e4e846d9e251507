//! Join choreography, disconnects and teardown
//!
//! A join runs in three steps. The mount reply rebuilds the rendering model
//! and replays recovered forms one at a time. Join completion then looks for
//! nested view markers and joins them. Finally the join patch is applied,
//! either right away (rejoin, or the parent is already live) or from the
//! root's queue once every node of the new subtree has acknowledged.

use livelink_core::constants::{
    PHX_CONNECTED_CLASS, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS, PHX_PARENT_ID, PHX_ROOT_ID,
    PHX_SESSION, PHX_STATIC,
};
use livelink_core::{
    CloseReason, DiffEnvelope, Dom, Hook, HookCommand, HookContext, JoinFailure, JoinParams,
    JoinReply, PageLoading, PageLoadingKind, ReplyOutcome, ViewId, ViewMarker,
};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{ViewError, ViewResult};
use crate::forms::{RecoveryQueue, forms_for_recovery, recovery_event};
use crate::render::PatchTarget;
use crate::socket::{LeaveCleanup, LiveSocket, expand_url, owned_elements};
use crate::timers::TimerKind;
use crate::tree::JoinPatch;
use crate::view::{Recovery, ReplyAction, ViewNode, ViewState};

impl<D: Dom> LiveSocket<D> {
    /// Connect the root view rendered in the container with id `id`
    ///
    /// The container must carry a session. The first connected root becomes
    /// the main view.
    pub fn connect_root(&mut self, id: &ViewId, flash: Option<String>) -> ViewResult<()> {
        if self.tree.contains(id) {
            return Err(ViewError::AlreadyJoined(id.clone()));
        }
        let el = self
            .dom
            .element_by_id(id.as_str())
            .ok_or_else(|| ViewError::ElementNotFound(id.to_string()))?;
        let marker = self
            .marker_of(el)
            .ok_or_else(|| ViewError::ElementNotFound(format!("{} has no session", id)))?;

        let channel = self.channels.channel(&id.topic());
        let mut node = ViewNode::new(marker, None, id.clone(), Some(el), channel);
        node.href = Some(self.navigator.current_url());
        node.flash = flash;
        self.tree.insert(node);
        if self.main.is_none() {
            self.main = Some(id.clone());
        }

        info!(view = %id, "Connecting root view");
        self.start_join(id);
        Ok(())
    }

    /// Destroy a view and its subtree
    pub fn destroy_view(&mut self, id: &ViewId) -> ViewResult<()> {
        if !self.tree.contains(id) {
            return Err(ViewError::ViewNotFound(id.clone()));
        }
        self.destroy(id, true);
        Ok(())
    }

    pub(crate) fn start_join(&mut self, id: &ViewId) {
        let now = self.clock.now();
        let track_static = self.track_static_urls();
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };

        node.state = ViewState::JoinRequested;
        node.replies.retain(|_, action| !matches!(action, ReplyAction::Join));
        if let Some(timer) = node.reconnect_timer.take() {
            self.timers.cancel(timer);
        }
        if let Some(timer) = node.loader_timer.take() {
            self.timers.cancel(timer);
        }
        node.loader_timer = Some(
            self.timers
                .schedule(now + self.config.loader_timeout, TimerKind::Loader(id.clone())),
        );

        if node.is_root() && node.page_loading.is_none() {
            let info = PageLoading {
                kind: PageLoadingKind::Initial,
                to: node.href.clone(),
                target: None,
            };
            self.navigator.page_loading_start(info.clone());
            node.page_loading = Some(info);
        }

        let mut params = self.navigator.connect_params(node.name.as_deref());
        params.insert("_mounts".to_string(), json!(node.join_count));
        if !track_static.is_empty() {
            params.insert("_track_static".to_string(), json!(track_static));
        }
        let join = JoinParams {
            url: node.href.clone(),
            params,
            session: node.session.clone(),
            static_token: node.static_token.clone(),
            flash: node.flash.clone(),
        };

        debug!(view = %id, join_count = node.join_count, "Requesting join");
        match node.channel.join(join) {
            Ok(push_ref) => {
                node.replies.insert(push_ref, ReplyAction::Join);
            }
            Err(e) => self.on_join_error(
                id,
                JoinFailure::Failed {
                    reason: e.to_string(),
                },
            ),
        }
    }

    fn track_static_urls(&self) -> Vec<String> {
        self.dom
            .query_attr(self.dom.document(), self.bindings.track_static())
            .into_iter()
            .filter_map(|el| {
                self.dom
                    .attribute(el, "src")
                    .or_else(|| self.dom.attribute(el, "href"))
            })
            .collect()
    }

    pub(crate) fn on_join_reply(&mut self, id: &ViewId, outcome: ReplyOutcome) {
        match outcome {
            ReplyOutcome::Ok(payload) => match JoinReply::from_payload(payload) {
                Ok(reply) => self.on_join_ok(id, reply),
                Err(e) => self.on_join_error(
                    id,
                    JoinFailure::Failed {
                        reason: e.to_string(),
                    },
                ),
            },
            ReplyOutcome::Error(payload) => self.on_join_error(id, JoinFailure::from_payload(&payload)),
            ReplyOutcome::Timeout => self.on_join_error(id, JoinFailure::timeout()),
        }
    }

    fn on_join_ok(&mut self, id: &ViewId, reply: JoinReply) {
        let envelope = DiffEnvelope::extract(reply.rendered);
        if let Some(title) = &envelope.title {
            self.navigator.put_title(title);
        }
        let rendered = self.rendered.build(id, &envelope.diff);
        let markup = rendered.to_markup(None);

        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.rendered = Some(rendered);
        node.child_joins = 0;
        node.state = ViewState::JoinPending;
        node.flash = None;
        node.pruner.clear();
        node.backoff.record_success();

        let forms = match node.el {
            Some(el) => {
                node.locks.drop_pending(&mut self.dom, el);
                let owned = owned_elements(&self.dom, el);
                forms_for_recovery(&self.dom, &owned, node.join_count, &markup, &self.bindings)
            }
            None => Vec::new(),
        };
        node.join_count += 1;
        info!(view = %id, join_count = node.join_count, recovering = forms.len(), "Joined");
        let (transferring, stale) = node.uploads.supersede(node.join_count);
        self.abandon_uploads(id, &transferring, stale);

        let patch = JoinPatch {
            markup,
            events: envelope.events,
            live_patch: reply.live_patch,
        };
        if forms.is_empty() {
            self.on_join_complete(id, patch);
        } else if let Some(node) = self.tree.get_mut(id) {
            node.recovery = Some(Recovery {
                forms: RecoveryQueue::new(forms),
                join: patch,
            });
            self.continue_recovery(id);
        }
    }

    /// Replay the next recovered form, or complete the join once none is left
    pub(crate) fn continue_recovery(&mut self, id: &ViewId) {
        loop {
            let Some(recovery) = self.tree.get_mut(id).and_then(|node| node.recovery.as_mut()) else {
                return;
            };
            let Some(form) = recovery.forms.next() else {
                let join = self
                    .tree
                    .get_mut(id)
                    .and_then(|node| node.recovery.take())
                    .map(|recovery| recovery.join);
                if let Some(join) = join {
                    self.on_join_complete(id, join);
                }
                return;
            };

            let Some(input) = self.dom.form_elements(form).first().copied() else {
                continue;
            };
            let Some(event) = recovery_event(&self.dom, form, &self.bindings) else {
                continue;
            };
            let cid = self.target_cid(id, form);
            debug!(view = %id, form = %form, event = %event, "Recovering form");
            match self.push_input_inner(id, input, &event, cid, true) {
                Ok(_) => return,
                Err(e) => warn!(view = %id, form = %form, error = %e, "Form recovery failed"),
            }
        }
    }

    pub(crate) fn on_join_complete(&mut self, id: &ViewId, patch: JoinPatch) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        let parent = node.parent.clone();
        let root = node.root.clone();
        let parent_pending = parent
            .as_ref()
            .and_then(|p| self.tree.get(p))
            .is_some_and(ViewNode::is_join_pending);

        if node.join_count > 1 || (parent.is_some() && !parent_pending) {
            if node.join_count > 1 && parent_pending {
                warn!(view = %id, "Rejoined while the parent is still joining, applying now");
            }
            let acked = self.tree.get_mut(id).is_some_and(|node| {
                let acked = node.awaiting_ack;
                node.awaiting_ack = false;
                acked
            });
            if let (true, Some(parent)) = (acked, &parent) {
                if let Some(parent) = self.tree.get_mut(parent) {
                    parent.child_joins = parent.child_joins.saturating_sub(1);
                }
            }
            self.apply_join_patch(id, patch);
            return;
        }

        let mut new_children = false;
        for mut marker in patch.markup.view_markers(id) {
            if let Some(el) = self.dom.element_by_id(marker.id.as_str()) {
                if let Some(token) = self.dom.attribute(el, PHX_STATIC).filter(|t| !t.is_empty()) {
                    marker.static_token = Some(token);
                }
            }
            new_children |= self.join_child(id, marker);
        }

        if new_children {
            self.tree.queue_join_op(&root, id.clone(), patch);
            return;
        }
        match parent {
            Some(parent) => {
                self.tree.queue_join_op(&root, id.clone(), patch);
                if let Some(node) = self.tree.get_mut(id) {
                    node.awaiting_ack = false;
                }
                self.ack_join(&parent);
            }
            None => {
                self.on_all_child_joins_complete(id);
                self.apply_join_patch(id, patch);
            }
        }
    }

    /// Create and join a nested view; false if it already exists
    fn join_child(&mut self, parent: &ViewId, marker: ViewMarker) -> bool {
        if self.tree.has_child(parent, &marker.id) || self.tree.contains(&marker.id) {
            return false;
        }
        let el = self.dom.element_by_id(marker.id.as_str());
        let Some(parent_node) = self.tree.get_mut(parent) else {
            return false;
        };
        parent_node.child_joins += 1;
        let join_count = parent_node.join_count.saturating_sub(1);
        let root = parent_node.root.clone();

        let child_id = marker.id.clone();
        let channel = self.channels.channel(&child_id.topic());
        let mut child = ViewNode::new(marker, Some(parent.clone()), root, el, channel);
        child.join_count = join_count;
        child.awaiting_ack = true;
        self.tree.insert(child);

        debug!(view = %child_id, parent = %parent, "Joining nested view");
        self.start_join(&child_id);
        true
    }

    /// Join nested views whose containers are in the document but not live
    pub(crate) fn join_new_children(&mut self, id: &ViewId) {
        let Some(el) = self.tree.get(id).and_then(|node| node.el) else {
            return;
        };
        let markers: Vec<ViewMarker> = self
            .dom
            .query_attr(el, PHX_PARENT_ID)
            .into_iter()
            .filter(|child| self.dom.attribute(*child, PHX_PARENT_ID).as_deref() == Some(id.as_str()))
            .filter(|child| {
                self.dom
                    .attribute(*child, PHX_SESSION)
                    .is_some_and(|session| !session.is_empty())
            })
            .filter_map(|child| self.marker_of(child))
            .collect();
        for marker in markers {
            self.join_child(id, marker);
        }
    }

    fn ack_join(&mut self, id: &ViewId) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.child_joins = node.child_joins.saturating_sub(1);
        if node.child_joins > 0 || !node.is_join_pending() {
            return;
        }
        match node.parent.clone() {
            Some(parent) => {
                if node.awaiting_ack {
                    node.awaiting_ack = false;
                    self.ack_join(&parent);
                }
            }
            None => self.on_all_child_joins_complete(id),
        }
    }

    fn on_all_child_joins_complete(&mut self, root: &ViewId) {
        let join_count = self.tree.get(root).map_or(0, |node| node.join_count);
        self.navigator.joined(root, join_count);
        for op in self.tree.take_join_ops(root) {
            if self.tree.is_current(&op) {
                self.apply_join_patch(&op.view, op.patch);
            } else {
                debug!(view = %op.view, "Skipping join patch of destroyed view");
            }
        }
    }

    pub(crate) fn apply_join_patch(&mut self, id: &ViewId, patch: JoinPatch) {
        let Some(el) = self.dom.element_by_id(id.as_str()) else {
            warn!(view = %id, "Container missing from the document, join patch dropped");
            return;
        };
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.el = Some(el);
        self.dom.set_attribute(el, PHX_ROOT_ID, node.root.as_str());

        self.perform_patch(id, PatchTarget::Children(el, &patch.markup), false);
        self.join_new_children(id);
        self.mount_owned_hooks(id);

        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.state = ViewState::Joined;
        let join_count = node.join_count;

        self.dispatch_events(&patch.events);
        self.apply_deferred(id);
        if let Some(live_patch) = &patch.live_patch {
            self.navigator.history_patch(&live_patch.to, live_patch.kind);
        }
        self.hide_loader(id);
        if join_count > 1 {
            self.call_hooks(id, |hook, ctx| hook.reconnected(ctx));
        }
        if let Some(info) = self.tree.get_mut(id).and_then(|node| node.page_loading.take()) {
            self.navigator.page_loading_stop(info);
        }
    }

    fn mount_owned_hooks(&mut self, id: &ViewId) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let Some(el) = node.el else {
            return;
        };
        let mut commands = Vec::new();
        let hook_attr = self.bindings.hook();
        for owned in owned_elements(&self.dom, el) {
            node.hooks
                .mount(&self.hooks, hook_attr, id, &self.dom, owned, &mut commands);
        }
        self.run_hook_commands(id, commands);
    }

    /// Run `f` against every hook of `id`, then the commands the hooks issued
    pub(crate) fn call_hooks(
        &mut self,
        id: &ViewId,
        f: impl FnMut(&mut dyn Hook, &mut HookContext<'_>),
    ) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let mut commands: Vec<HookCommand> = Vec::new();
        node.hooks.call_all(id, &self.dom, &mut commands, f);
        self.run_hook_commands(id, commands);
    }

    fn set_container_classes(&mut self, id: &ViewId, classes: &[&str]) {
        let Some(el) = self.tree.get(id).and_then(|node| node.el) else {
            return;
        };
        for class in [PHX_CONNECTED_CLASS, PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS] {
            self.dom.remove_class(el, class);
        }
        for class in classes {
            self.dom.add_class(el, class);
        }
    }

    fn show_loader(&mut self, id: &ViewId) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        if let Some(timer) = node.loader_timer.take() {
            self.timers.cancel(timer);
        }
        if node.loader_shown {
            return;
        }
        node.loader_shown = true;
        self.call_hooks(id, |hook, ctx| hook.disconnected(ctx));
        self.set_container_classes(id, &[PHX_DISCONNECTED_CLASS]);
    }

    fn hide_loader(&mut self, id: &ViewId) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.loader_shown = false;
        if let Some(timer) = node.loader_timer.take() {
            self.timers.cancel(timer);
        }
        self.set_container_classes(id, &[PHX_CONNECTED_CLASS]);
    }

    fn schedule_loader(&mut self, id: &ViewId, delay: Duration) {
        let at = self.clock.now() + delay;
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        if let Some(timer) = node.loader_timer.take() {
            self.timers.cancel(timer);
        }
        node.loader_timer = Some(self.timers.schedule(at, TimerKind::Loader(id.clone())));
    }

    pub(crate) fn on_loader_timeout(&mut self, id: &ViewId) {
        if let Some(node) = self.tree.get_mut(id) {
            node.loader_timer = None;
        }
        self.show_loader(id);
    }

    fn schedule_reconnect(&mut self, id: &ViewId) {
        let now = self.clock.now();
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let delay = node.backoff.delay(&self.config.reconnect);
        if let Some(timer) = node.reconnect_timer.take() {
            self.timers.cancel(timer);
        }
        node.reconnect_timer = Some(self.timers.schedule(
            now + delay,
            TimerKind::Reconnect {
                view: id.clone(),
                join_count: node.join_count,
            },
        ));
        debug!(
            view = %id,
            delay_ms = delay.as_millis() as u64,
            failures = node.backoff.consecutive_failures(),
            "Reconnect scheduled"
        );
    }

    pub(crate) fn on_reconnect_timer(&mut self, id: &ViewId, join_count: u32) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.reconnect_timer = None;
        let idle = matches!(node.state, ViewState::Disconnected | ViewState::Errored);
        if node.join_count != join_count || !idle {
            debug!(view = %id, "Discarding stale reconnect");
            return;
        }
        if node.backoff.is_exhausted(&self.config.reconnect) {
            warn!(
                view = %id,
                failures = node.backoff.consecutive_failures(),
                "Reconnect attempts exhausted, reloading"
            );
            match self.pending_link.take() {
                Some(link) => self.navigator.redirect(&link.href, None),
                None => self.navigator.reload(),
            }
            return;
        }
        info!(view = %id, "Reconnecting");
        self.start_join(id);
    }

    /// Tear down the subtree and retry the join after a jittered delay
    pub(crate) fn reload_with_jitter(&mut self, id: &ViewId) {
        self.destroy_all_children(id);
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.state = ViewState::Disconnected;
        node.recovery = None;
        node.backoff.record_failure();
        let root = node.root.clone();
        if node.is_root() {
            self.tree.take_join_ops(&root);
        } else {
            self.tree.discard_join_ops(&root, id);
        }
        self.schedule_reconnect(id);
    }

    pub(crate) fn on_close(&mut self, id: &ViewId, reason: &CloseReason) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        let join_pending = node.is_join_pending();
        if (join_pending && self.dom.is_visible()) || (self.pending_link.is_some() && !reason.is_leave()) {
            info!(view = %id, ?reason, "Channel closed while joining");
            self.reload_with_jitter(id);
            return;
        }

        debug!(view = %id, ?reason, "Channel closed");
        self.destroy_all_children(id);
        if let Some(active) = self.dom.active_element() {
            self.dom.blur(active);
        }
        if let Some(node) = self.tree.get_mut(id) {
            node.state = ViewState::Disconnected;
        }
        if self.navigator.is_unloaded() {
            self.schedule_loader(id, self.config.before_unload_loader_timeout);
            return;
        }
        self.show_loader(id);
        if !reason.is_leave() {
            self.schedule_reconnect(id);
        }
    }

    pub(crate) fn on_error(&mut self, id: &ViewId, reason: &str) {
        self.on_close(id, &CloseReason::Other(reason.to_string()));
        error!(view = %id, reason = %reason, "View crashed");

        let inputs = self
            .tree
            .get(id)
            .map(|node| node.uploads.in_flight_inputs(node.join_count))
            .unwrap_or_default();
        for input in inputs {
            self.fail_upload(id, input);
        }
        if !self.navigator.is_unloaded() {
            self.display_error(id);
        }
    }

    fn display_error(&mut self, id: &ViewId) {
        if self.main.as_ref() == Some(id) {
            let to = self.tree.get(id).and_then(|node| node.href.clone());
            self.navigator.page_loading_start(PageLoading {
                kind: PageLoadingKind::Error,
                to,
                target: None,
            });
        }
        self.show_loader(id);
        self.set_container_classes(id, &[PHX_DISCONNECTED_CLASS, PHX_ERROR_CLASS]);
        if let Some(node) = self.tree.get_mut(id) {
            node.state = ViewState::Errored;
        }
    }

    pub(crate) fn on_join_error(&mut self, id: &ViewId, failure: JoinFailure) {
        if failure.is_redirect() {
            self.abandon_join(id);
        }
        match failure {
            JoinFailure::Redirect(redirect) => {
                info!(view = %id, to = %redirect.to, "Join redirected");
                self.navigator.redirect(&redirect.to, redirect.flash.as_deref());
            }
            JoinFailure::LiveRedirect(redirect) => {
                info!(view = %id, to = %redirect.to, "Join live redirected");
                let url = expand_url(&self.navigator.current_url(), &redirect.to);
                self.navigator
                    .live_redirect(&url, redirect.kind, redirect.flash.as_deref());
            }
            JoinFailure::Failed { reason } => {
                warn!(view = %id, reason = %reason, "Unable to join");
                self.reload_with_jitter(id);
            }
        }
    }

    fn abandon_join(&mut self, id: &ViewId) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        node.state = ViewState::Disconnected;
        if let Err(e) = node.channel.leave() {
            debug!(view = %id, error = %e, "Leave after redirect failed");
        }
        if let Some(timer) = node.loader_timer.take() {
            self.timers.cancel(timer);
        }
        if let Some(info) = node.page_loading.take() {
            self.navigator.page_loading_stop(info);
        }
    }

    fn destroy_all_children(&mut self, id: &ViewId) {
        for child in self.tree.children_of(id) {
            self.destroy(&child, false);
        }
    }

    /// Destroy `id` and its descendants, children first
    ///
    /// With `ack_parent`, a node destroyed before acknowledging its join
    /// releases its parent's wait.
    pub(crate) fn destroy(&mut self, id: &ViewId, ack_parent: bool) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        let parent = node.parent.clone();
        let awaiting = node.awaiting_ack;

        let mut order = Vec::new();
        self.collect_subtree(id, &mut order);
        for view in order {
            self.teardown(&view);
        }

        if let (true, true, Some(parent)) = (ack_parent, awaiting, parent) {
            self.ack_join(&parent);
        }
    }

    fn collect_subtree(&self, id: &ViewId, out: &mut Vec<ViewId>) {
        for child in self.tree.children_of(id) {
            self.collect_subtree(&child, out);
        }
        out.push(id.clone());
    }

    fn teardown(&mut self, id: &ViewId) {
        let Some(mut node) = self.tree.remove(id) else {
            return;
        };
        self.timers.cancel_view(id);
        if let (Some(el), false) = (node.el, node.is_root()) {
            self.dom.set_attribute(el, PHX_SESSION, "");
        }
        if let Some(info) = node.page_loading.take() {
            self.navigator.page_loading_stop(info);
        }
        if self.main.as_ref() == Some(id) {
            self.main = None;
        }

        let uploads = node.uploads.in_flight_inputs(node.join_count);
        info!(view = %id, "Destroying view");
        let topic = node.channel.topic().to_string();
        let leave = node.channel.leave();
        let cleanup = LeaveCleanup {
            view: id.clone(),
            channel: node.channel,
            hooks: node.hooks,
            uploads,
        };
        match leave {
            Ok(push_ref) => {
                self.leaving.insert((topic, push_ref), cleanup);
            }
            Err(e) => {
                debug!(view = %id, error = %e, "Leave failed, cleaning up now");
                self.finish_leave(cleanup);
            }
        }
    }

    /// Release what a destroyed view held once its leave completed
    pub(crate) fn finish_leave(&mut self, mut cleanup: LeaveCleanup) {
        let mut commands = Vec::new();
        cleanup
            .hooks
            .destroy_all(&cleanup.view, &self.dom, &mut commands);
        if let Some(uploader) = self.uploader.as_mut() {
            for input in &cleanup.uploads {
                uploader.cancel(&cleanup.view, *input);
            }
        }
        debug!(
            view = %cleanup.view,
            topic = %cleanup.channel.topic(),
            dropped_commands = commands.len(),
            "Leave complete"
        );
    }
}
