//! Applying server renders to the document
//!
//! Diffs merge into the node's rendering model and the resulting markup is
//! reconciled against the container. A [`PatchHandler`] observes the
//! reconciler: it mounts and notifies hooks, defers updates of locked
//! elements and collects the components and nested views that were removed.

use std::collections::HashSet;

use livelink_core::constants::{PHX_COMPONENT, PHX_PARENT_ID, PHX_REF, PHX_SESSION};
use livelink_core::{
    ComponentId, DiffEnvelope, Dom, HookCommand, HookRegistry, Markup, MarkupElement, NodeId,
    PatchObserver, PushReply, ReplyOutcome, ServerMessage, UpdateDecision, ViewId,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::hooks::ViewHooks;
use crate::ref_lock::RefLock;
use crate::socket::{LiveSocket, owns_element};
use crate::upload::UploadCoordinator;
use crate::view::{Deferred, ReplyAction};

/// What a patch reconciles
pub(crate) enum PatchTarget<'a> {
    /// Children of a container
    Children(NodeId, &'a Markup),
    /// One element, attributes and subtree
    Element(NodeId, &'a MarkupElement),
}

struct PatchHandler<'a> {
    view: &'a ViewId,
    registry: &'a HookRegistry,
    hook_attr: &'a str,
    hooks: &'a mut ViewHooks,
    locks: &'a mut RefLock,
    uploads: &'a mut UploadCoordinator,
    commands: Vec<HookCommand>,
    updating: HashSet<NodeId>,
    discarded_cids: Vec<ComponentId>,
    discarded_views: Vec<ViewId>,
}

impl PatchHandler<'_> {
    fn changed(dom: &dyn Dom, el: NodeId, target: &MarkupElement) -> bool {
        let current = dom.attributes(el);
        current.len() != target.attrs.len()
            || target
                .attrs
                .iter()
                .any(|(name, value)| dom.attribute(el, name).as_deref() != Some(value.as_str()))
            || dom.inner_text(el) != target.text()
    }
}

impl PatchObserver for PatchHandler<'_> {
    fn added(&mut self, dom: &dyn Dom, el: NodeId) {
        if owns_element(dom, self.view, el) {
            self.hooks
                .mount(self.registry, self.hook_attr, self.view, dom, el, &mut self.commands);
        }
    }

    fn before_update(&mut self, dom: &dyn Dom, el: NodeId, target: &MarkupElement) -> UpdateDecision {
        if dom.has_attribute(el, PHX_REF) {
            self.locks.defer(el, target.clone());
            return UpdateDecision::Defer;
        }
        if self.hooks.contains(el) && Self::changed(dom, el, target) {
            self.hooks
                .call(self.view, dom, el, &mut self.commands, |hook, ctx| hook.before_update(ctx));
            self.updating.insert(el);
        }
        UpdateDecision::Apply
    }

    fn updated(&mut self, dom: &dyn Dom, el: NodeId) {
        if self.updating.remove(&el) {
            self.hooks
                .call(self.view, dom, el, &mut self.commands, |hook, ctx| hook.updated(ctx));
        }
    }

    fn discarded(&mut self, dom: &dyn Dom, el: NodeId) {
        let cid = dom
            .attribute(el, PHX_COMPONENT)
            .and_then(|value| ComponentId::parse(&value))
            .filter(|_| owns_element(dom, self.view, el));
        if let Some(cid) = cid {
            if !self.discarded_cids.contains(&cid) {
                self.discarded_cids.push(cid);
            }
        }
        self.hooks.destroy(self.view, dom, el, &mut self.commands);
        self.uploads.remove_input(el);
        self.locks.forget(el);

        let nested = dom.attribute(el, PHX_PARENT_ID).as_deref() == Some(self.view.as_str())
            && dom.has_attribute(el, PHX_SESSION);
        if let (true, Some(id)) = (nested, dom.attribute(el, "id")) {
            self.discarded_views.push(ViewId::new(id));
        }
    }
}

impl<D: Dom> LiveSocket<D> {
    /// Reconcile `target` for view `id`
    ///
    /// Returns true if the patch added nested view containers. With `prune`,
    /// components that disappeared are announced for destruction.
    pub(crate) fn perform_patch(&mut self, id: &ViewId, target: PatchTarget<'_>, prune: bool) -> bool {
        let Some(node) = self.tree.get_mut(id) else {
            return false;
        };
        let mut handler = PatchHandler {
            view: id,
            registry: &self.hooks,
            hook_attr: self.bindings.hook(),
            hooks: &mut node.hooks,
            locks: &mut node.locks,
            uploads: &mut node.uploads,
            commands: Vec::new(),
            updating: HashSet::new(),
            discarded_cids: Vec::new(),
            discarded_views: Vec::new(),
        };
        let result = match target {
            PatchTarget::Children(container, markup) => self.dom.patch(container, markup, &mut handler),
            PatchTarget::Element(el, element) => self.dom.patch_element(el, element, &mut handler),
        };
        let PatchHandler {
            commands,
            discarded_cids,
            discarded_views,
            ..
        } = handler;

        let added = match result {
            Ok(outcome) => outcome.child_views_added,
            Err(e) => {
                warn!(view = %id, error = %e, "Patch failed");
                false
            }
        };

        for child in discarded_views {
            if self.tree.has_child(id, &child) {
                self.destroy(&child, true);
            }
        }
        if prune {
            self.maybe_push_components_destroyed(id, &discarded_cids);
        }
        self.run_hook_commands(id, commands);
        added
    }

    pub(crate) fn on_message(&mut self, id: &ViewId, message: ServerMessage) {
        if let ServerMessage::Diff(raw) = message {
            self.apply_diff(id, raw);
            return;
        }
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        if node.is_join_pending() {
            node.deferred.push_back(Deferred::Message(message));
            return;
        }
        self.apply_message(id, message);
    }

    fn apply_message(&mut self, id: &ViewId, message: ServerMessage) {
        match message {
            ServerMessage::Diff(raw) => {
                self.apply_diff(id, raw);
            }
            ServerMessage::Redirect(redirect) => {
                self.navigator.redirect(&redirect.to, redirect.flash.as_deref());
            }
            ServerMessage::LivePatch(patch) => self.on_live_patch(id, &patch),
            ServerMessage::LiveRedirect(redirect) => self.on_live_redirect(&redirect),
        }
    }

    /// Apply a raw diff; returns the hook reply it carried
    pub(crate) fn apply_diff(&mut self, id: &ViewId, raw: Value) -> Option<Value> {
        let envelope = DiffEnvelope::extract(raw);
        if let Some(title) = &envelope.title {
            self.navigator.put_title(title);
        }
        let reply = envelope.reply.clone();
        self.update(id, envelope);
        reply
    }

    /// Merge a diff into the rendering model and patch the document
    ///
    /// Queued while the node is joining or a navigation is in flight.
    pub(crate) fn update(&mut self, id: &ViewId, envelope: DiffEnvelope) {
        let link_pending = self.pending_link.is_some();
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        if node.is_join_pending() || link_pending {
            node.deferred.push_back(Deferred::Diff(envelope));
            return;
        }
        let Some(el) = node.el else {
            warn!(view = %id, "Update for a detached view dropped");
            return;
        };
        let Some(rendered) = node.rendered.as_mut() else {
            return;
        };
        rendered.merge_diff(&envelope.diff);

        let mut children_added = false;
        if rendered.is_component_only_diff(&envelope.diff) {
            let cids = rendered.component_ids(&envelope.diff);
            children_added = self.patch_components(id, &cids);
        } else if !envelope.is_empty() {
            let mut only = rendered.component_ids(&envelope.diff);
            only.extend(node.pruner.pending());
            let markup = rendered.to_markup(Some(&only));
            children_added = self.perform_patch(id, PatchTarget::Children(el, &markup), true);
        }

        self.dispatch_events(&envelope.events);
        if children_added {
            self.join_new_children(id);
        }
    }

    /// Patch the outermost containers of `cids` with their own markup
    fn patch_components(&mut self, id: &ViewId, cids: &[ComponentId]) -> bool {
        let containers: Vec<(ComponentId, NodeId)> = cids
            .iter()
            .flat_map(|cid| {
                self.component_containers(id, *cid)
                    .into_iter()
                    .map(move |container| (*cid, container))
            })
            .collect();
        let outermost: Vec<(ComponentId, NodeId)> = containers
            .iter()
            .filter(|(_, el)| {
                !containers
                    .iter()
                    .any(|(_, other)| other != el && self.dom.contains(*other, *el))
            })
            .copied()
            .collect();

        let mut added = false;
        for (cid, container) in outermost {
            let Some(markup) = self
                .tree
                .get(id)
                .and_then(|node| node.rendered.as_ref())
                .map(|rendered| rendered.component_to_markup(cid))
            else {
                continue;
            };
            debug!(view = %id, cid = %cid, "Patching component");
            added |= self.perform_patch(id, PatchTarget::Children(container, &markup), true);
        }
        added
    }

    pub(crate) fn dispatch_events(&mut self, events: &[(String, Value)]) {
        for (name, payload) in events {
            self.navigator
                .dispatch_event(&format!("phx:hook:{}", name), payload);
        }
    }

    /// Replay queued updates of `id` in arrival order
    pub(crate) fn apply_deferred(&mut self, id: &ViewId) {
        loop {
            if self.pending_link.is_some() {
                return;
            }
            let Some(node) = self.tree.get_mut(id) else {
                return;
            };
            if node.is_join_pending() {
                return;
            }
            let Some(next) = node.deferred.pop_front() else {
                return;
            };
            match next {
                Deferred::Diff(envelope) => self.update(id, envelope),
                Deferred::Message(message) => self.apply_message(id, message),
            }
        }
    }

    pub(crate) fn apply_deferred_all(&mut self) {
        for id in self.tree.ids() {
            self.apply_deferred(&id);
        }
    }

    /// Release `token` and apply the updates its elements missed
    pub(crate) fn unlock(&mut self, id: &ViewId, token: livelink_core::RefToken) {
        let document = self.dom.document();
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let scope = node.el.unwrap_or(document);
        let deferred = node.locks.unlock(&mut self.dom, scope, token);
        for (el, target) in deferred {
            self.perform_patch(id, PatchTarget::Element(el, &target), true);
        }
    }

    fn present_components(&self, id: &ViewId, cids: &[ComponentId]) -> Vec<ComponentId> {
        cids.iter()
            .copied()
            .filter(|cid| !self.component_containers(id, *cid).is_empty())
            .collect()
    }

    /// Announce components that left the document
    pub(crate) fn maybe_push_components_destroyed(&mut self, id: &ViewId, discarded: &[ComponentId]) {
        if discarded.is_empty() {
            return;
        }
        let present = self.present_components(id, discarded);
        let timeout = self.config.push_timeout;
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        if !node.channel.can_push() {
            return;
        }
        let Some(batch) = node.pruner.begin(discarded, |cid| present.contains(&cid)) else {
            return;
        };

        debug!(view = %id, cids = ?batch, "Components will be destroyed");
        match node
            .channel
            .push("cids_will_destroy", json!({ "cids": batch }), Some(timeout))
        {
            Ok(push_ref) => {
                node.replies.insert(push_ref, ReplyAction::WillDestroy(batch));
            }
            Err(e) => {
                warn!(view = %id, error = %e, "Unable to announce destroyed components");
                node.pruner.settle(&batch, |_| true);
            }
        }
    }

    pub(crate) fn on_will_destroy_reply(&mut self, id: &ViewId, cids: Vec<ComponentId>, outcome: ReplyOutcome) {
        let present = self.present_components(id, &cids);
        let timeout = self.config.push_timeout;
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let absent = node.pruner.settle(&cids, |cid| present.contains(&cid));
        if !matches!(outcome, ReplyOutcome::Ok(_)) {
            debug!(view = %id, cids = ?cids, "Component destruction not acknowledged");
            return;
        }
        if absent.is_empty() {
            return;
        }

        match node
            .channel
            .push("cids_destroyed", json!({ "cids": absent }), Some(timeout))
        {
            Ok(push_ref) => {
                node.replies.insert(push_ref, ReplyAction::Destroyed(absent));
            }
            Err(e) => warn!(view = %id, error = %e, "Unable to confirm destroyed components"),
        }
    }

    pub(crate) fn on_destroyed_reply(&mut self, id: &ViewId, cids: Vec<ComponentId>, outcome: ReplyOutcome) {
        let ReplyOutcome::Ok(payload) = outcome else {
            debug!(view = %id, cids = ?cids, "Component destruction not confirmed");
            return;
        };
        let confirmed = PushReply::from_payload(payload).cids().unwrap_or(cids);
        let present = self.present_components(id, &confirmed);
        let pruned: Vec<ComponentId> = confirmed
            .into_iter()
            .filter(|cid| !present.contains(cid))
            .collect();
        if let Some(rendered) = self.tree.get_mut(id).and_then(|node| node.rendered.as_mut()) {
            debug!(view = %id, cids = ?pruned, "Pruning components");
            rendered.prune_ids(&pruned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_core::{MarkupRenderedFactory, MemoryDom, MockChannelHub, RecordingNavigator, markup_diff};

    fn joined() -> (LiveSocket<MemoryDom>, MockChannelHub, RecordingNavigator) {
        let mut dom = MemoryDom::new();
        let body = dom.body();
        dom.append(
            body,
            &MarkupElement::new("div")
                .with_attr("id", "root")
                .with_attr(PHX_SESSION, "signed"),
        );
        let hub = MockChannelHub::new();
        let nav = RecordingNavigator::new("http://localhost/");
        let mut socket = LiveSocket::builder(dom)
            .channels(hub.factory())
            .rendered(Box::new(MarkupRenderedFactory))
            .navigator(nav.boxed())
            .build()
            .unwrap();
        socket.connect_root(&ViewId::new("root"), None).unwrap();
        let html = Markup::from_elements([MarkupElement::new("p").with_attr("id", "count").with_text("0")]);
        socket.handle_channel_event(hub.join_rendered("lv:root", markup_diff(Some(&html), &[])));
        (socket, hub, nav)
    }

    #[test]
    fn test_diff_message_patches_document() {
        let (mut socket, hub, nav) = joined();
        let html = Markup::from_elements([MarkupElement::new("p").with_attr("id", "count").with_text("1")]);
        let mut diff = markup_diff(Some(&html), &[]);
        diff["t"] = json!("Counter");
        socket.handle_channel_event(hub.message("lv:root", "diff", diff));

        let el = socket.dom().element_by_id("count").unwrap();
        assert_eq!(socket.dom().inner_text(el), "1");
        assert!(nav.events().contains(&livelink_core::NavEvent::Title("Counter".to_string())));
    }

    #[test]
    fn test_locked_element_update_is_deferred() {
        let (mut socket, hub, _nav) = joined();
        let el = socket.dom().element_by_id("count").unwrap();
        socket.dom_mut().set_attribute(el, PHX_REF, "7");

        let html = Markup::from_elements([MarkupElement::new("p").with_attr("id", "count").with_text("2")]);
        socket.handle_channel_event(hub.message("lv:root", "diff", markup_diff(Some(&html), &[])));

        assert_eq!(socket.dom().inner_text(el), "0");
        assert!(socket.view(&ViewId::new("root")).unwrap().locks.has_deferred(el));
    }
}
