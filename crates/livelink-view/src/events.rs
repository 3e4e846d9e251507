//! Client events, forms, uploads and live navigation
//!
//! Every user-visible push locks the elements it concerns under a fresh
//! token. The token travels with the outstanding push and is released when
//! the reply arrives, whatever its outcome.

use livelink_core::constants::{CHECKABLE_INPUTS, PHX_AUTO_UPLOAD, PHX_COMPONENT, PHX_UPLOAD_REF};
use livelink_core::{
    ComponentId, Dom, EventPayload, Flag, HookCommand, LivePatch, LiveRedirect, NavKind, NodeId,
    PageLoading, PageLoadingKind, PushReply, RefToken, ReplyOutcome, UploadReport,
    UploadReportKind, ViewId,
};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::{ViewError, ViewResult};
use crate::forms::{ScheduledSubmit, serialize_form};
use crate::ref_lock::RefLock;
use crate::socket::{LiveSocket, PendingLink, expand_url, owns_element};
use crate::upload::{EntryStatus, PreflightOutcome, UploadBatch, UploadFollowUp};
use crate::view::{FollowUp, PendingEvent, ReplyAction};

/// Elements locked for one push
#[derive(Debug, Clone, Copy)]
pub(crate) struct Locked {
    pub token: RefToken,
    /// Element that triggered the push
    pub first: Option<NodeId>,
}

impl<D: Dom> LiveSocket<D> {
    /// Push a client event bound on `el`
    ///
    /// `meta` carries extra values merged before the element's own values.
    pub fn push_event(
        &mut self,
        kind: &str,
        el: NodeId,
        event: &str,
        meta: Map<String, Value>,
    ) -> ViewResult<RefToken> {
        let id = self.event_owner(el, event)?;
        self.ensure_connected(&id)?;

        let value = self.extract_meta(el, meta);
        let cid = self.target_cid(&id, el);
        let locked = self.lock_elements(&id, &[el], kind)?;
        let payload = EventPayload {
            kind: kind.to_string(),
            event: event.to_string(),
            value: Value::Object(value),
            cid,
            uploads: None,
        };
        self.push_with_reply(&id, Some(locked), "event", payload.to_value(), FollowUp::None)?;
        Ok(locked.token)
    }

    /// Push the change event of a form input
    pub fn push_input(&mut self, input: NodeId, event: &str) -> ViewResult<RefToken> {
        let id = self.event_owner(input, event)?;
        self.ensure_connected(&id)?;
        let form = self
            .dom
            .form_of(input)
            .ok_or_else(|| ViewError::ElementNotFound(format!("form of {}", input)))?;
        let cid = self.target_cid(&id, form);
        self.push_input_inner(&id, input, event, cid, false)
    }

    /// Submit `form`, waiting for its uploads first
    pub fn submit_form(&mut self, form: NodeId, event: &str) -> ViewResult<()> {
        let id = self.event_owner(form, event)?;
        self.ensure_connected(&id)?;
        if let Some(active) = self.dom.active_element() {
            self.dom.blur(active);
        }
        self.push_form_submit(&id, form, event)
    }

    /// Push an event on behalf of the hook mounted on `el`
    ///
    /// The reply is delivered to the hook's `handle_reply` with the returned
    /// token.
    pub fn push_hook_event(
        &mut self,
        view: &ViewId,
        el: NodeId,
        event: &str,
        payload: Value,
    ) -> ViewResult<RefToken> {
        self.ensure_connected(view)?;
        let locked = self.lock_elements(view, &[], "hook")?;
        let cid = self.closest_cid(view, el);
        let payload = EventPayload {
            kind: "hook".to_string(),
            event: event.to_string(),
            value: payload,
            cid,
            uploads: None,
        };
        self.push_with_reply(
            view,
            Some(locked),
            "event",
            payload.to_value(),
            FollowUp::HookReply {
                el,
                token: locked.token,
            },
        )?;
        Ok(locked.token)
    }

    /// Navigate the main view to `href` without a page load
    ///
    /// Returns the link id. Updates are held back until the reply commits or
    /// abandons the navigation.
    pub fn push_link_patch(&mut self, href: &str, target: Option<NodeId>) -> ViewResult<u64> {
        let id = self.main.clone().ok_or(ViewError::NoMainView)?;
        self.ensure_connected(&id)?;
        let locked = match target {
            Some(el) => Some(self.lock_elements(&id, &[el], "click")?),
            None => None,
        };

        self.link_counter += 1;
        let link_id = self.link_counter;
        self.pending_link = Some(PendingLink {
            id: link_id,
            href: href.to_string(),
        });
        info!(view = %id, href = %href, link_id, "Live navigation");

        let then = FollowUp::Link {
            link_id,
            href: href.to_string(),
        };
        match self.push_with_reply(&id, locked, "link", json!({ "url": href }), then) {
            Ok(()) => Ok(link_id),
            Err(e) => {
                self.clear_pending_link(link_id);
                Err(e)
            }
        }
    }

    /// Feed a report from the upload adapter
    pub fn handle_upload_report(&mut self, report: UploadReport) {
        let UploadReport {
            view,
            input,
            join_count,
            kind,
        } = report;
        let Some(node) = self.tree.get(&view) else {
            debug!(view = %view, "Upload report for unknown view");
            return;
        };
        if node.join_count != join_count {
            debug!(view = %view, input = %input, "Ignoring upload report from a previous join");
            return;
        }
        match kind {
            UploadReportKind::Progress { entry_ref, progress } => {
                self.on_upload_progress(&view, input, &entry_ref, progress)
            }
            UploadReportKind::Error { reason } => {
                warn!(view = %view, input = %input, reason = %reason, "Upload failed");
                self.fail_upload(&view, input);
            }
        }
    }

    fn event_owner(&self, el: NodeId, event: &str) -> ViewResult<ViewId> {
        self.owner(el).ok_or_else(|| {
            warn!(element = %el, event = %event, "No view owns the event target, event dropped");
            ViewError::ElementNotFound(el.to_string())
        })
    }

    fn extract_meta(&self, el: NodeId, mut meta: Map<String, Value>) -> Map<String, Value> {
        let prefix = self.bindings.value_prefix();
        for (name, value) in self.dom.attributes(el) {
            if let Some(key) = name.strip_prefix(prefix) {
                meta.insert(key.to_string(), Value::String(value));
            }
        }
        if let Some(value) = self.dom.value(el) {
            meta.insert("value".to_string(), Value::String(value));
        }
        let checkable = self.dom.tag_name(el).as_deref() == Some("input")
            && self
                .dom
                .attribute(el, "type")
                .is_some_and(|t| CHECKABLE_INPUTS.contains(&t.as_str()));
        if checkable && !self.dom.flag(el, Flag::Checked) {
            meta.remove("value");
        }
        meta
    }

    /// Component an event on `el` is addressed to
    pub(crate) fn target_cid(&self, id: &ViewId, el: NodeId) -> Option<ComponentId> {
        let target = self
            .dom
            .attribute(el, self.bindings.target())
            .filter(|t| !t.is_empty())?;
        if let Some(cid) = ComponentId::parse(&target) {
            return Some(cid);
        }
        let context = target
            .strip_prefix('#')
            .and_then(|target_id| self.dom.element_by_id(target_id))
            .unwrap_or(el);
        self.closest_cid(id, context)
    }

    fn closest_cid(&self, id: &ViewId, el: NodeId) -> Option<ComponentId> {
        let container = self.dom.closest_with_attr(el, PHX_COMPONENT)?;
        if !owns_element(&self.dom, id, container) {
            return None;
        }
        self.dom
            .attribute(container, PHX_COMPONENT)
            .and_then(|value| ComponentId::parse(&value))
    }

    fn file_inputs(&self, form: NodeId) -> Vec<NodeId> {
        self.dom
            .form_elements(form)
            .into_iter()
            .filter(|el| {
                self.dom.has_attribute(*el, PHX_UPLOAD_REF)
                    && self.dom.attribute(*el, "type").as_deref() == Some("file")
            })
            .collect()
    }

    pub(crate) fn lock_elements(&mut self, id: &ViewId, elements: &[NodeId], kind: &str) -> ViewResult<Locked> {
        let lockable = RefLock::lockable(&self.dom, elements);
        let node = self
            .tree
            .get_mut(id)
            .ok_or_else(|| ViewError::ViewNotFound(id.clone()))?;
        let token = node
            .locks
            .lock(&mut self.dom, &lockable, kind, self.bindings.disable_with())?;
        Ok(Locked {
            token,
            first: elements.first().copied(),
        })
    }

    /// True if an ancestor of `el` below `form` ignores updates
    fn update_ignored(&self, el: NodeId, form: NodeId) -> bool {
        let mut current = Some(el);
        while let Some(node) = current {
            if node == form {
                return false;
            }
            let ignored = [self.bindings.update(), "data-phx-update"]
                .iter()
                .any(|attr| self.dom.attribute(node, attr).as_deref() == Some("ignore"));
            if ignored {
                return true;
            }
            current = self.dom.parent(node);
        }
        false
    }

    /// Lock a form and its fields for submission
    fn lock_form(&mut self, id: &ViewId, form: NodeId) -> ViewResult<Locked> {
        let fields = self.dom.form_elements(form);
        let disable_with = self.bindings.disable_with();
        let disables: Vec<NodeId> = fields
            .iter()
            .copied()
            .filter(|el| self.dom.has_attribute(*el, disable_with))
            .collect();
        let buttons: Vec<NodeId> = fields
            .iter()
            .copied()
            .filter(|el| self.dom.tag_name(*el).as_deref() == Some("button"))
            .filter(|el| !self.update_ignored(*el, form))
            .collect();
        let inputs: Vec<NodeId> = fields
            .iter()
            .copied()
            .filter(|el| {
                matches!(
                    self.dom.tag_name(*el).as_deref(),
                    Some("input" | "textarea" | "select")
                )
            })
            .filter(|el| !self.update_ignored(*el, form))
            .collect();

        let mut all = vec![form];
        all.extend(&disables);
        all.extend(&buttons);
        all.extend(&inputs);
        let lockable = RefLock::lockable(&self.dom, &all);

        for button in buttons.iter().filter(|el| lockable.contains(el)) {
            RefLock::freeze(&mut self.dom, *button, Flag::Disabled);
        }
        for input in inputs.iter().filter(|el| lockable.contains(el)) {
            RefLock::freeze(&mut self.dom, *input, Flag::ReadOnly);
            if self.dom.attribute(*input, "type").as_deref() == Some("file") {
                RefLock::freeze(&mut self.dom, *input, Flag::Disabled);
            }
        }
        self.dom.set_attribute(form, self.bindings.page_loading(), "");
        self.lock_elements(id, &all, "submit")
    }

    /// Push `event` and record how to handle its reply
    ///
    /// A failed push releases the lock right away.
    pub(crate) fn push_with_reply(
        &mut self,
        id: &ViewId,
        locked: Option<Locked>,
        event: &str,
        payload: Value,
        then: FollowUp,
    ) -> ViewResult<()> {
        if !self.tree.contains(id) {
            return Err(ViewError::ViewNotFound(id.clone()));
        }
        let loading = locked
            .and_then(|l| l.first)
            .filter(|el| self.dom.has_attribute(*el, self.bindings.page_loading()))
            .map(|el| PageLoading {
                kind: PageLoadingKind::Element,
                to: None,
                target: Some(el),
            });
        if let Some(info) = &loading {
            self.navigator.page_loading_start(info.clone());
        }

        let timeout = self.config.push_timeout;
        let Some(node) = self.tree.get_mut(id) else {
            return Err(ViewError::ViewNotFound(id.clone()));
        };
        match node.channel.push(event, payload, Some(timeout)) {
            Ok(push_ref) => {
                debug!(view = %id, event = %event, push_ref = %push_ref, "Pushed");
                node.replies.insert(
                    push_ref,
                    ReplyAction::Event(PendingEvent {
                        token: locked.map(|l| l.token),
                        loading,
                        then,
                    }),
                );
                Ok(())
            }
            Err(e) => {
                if let Some(l) = locked {
                    self.unlock(id, l.token);
                }
                if let Some(info) = loading {
                    self.navigator.page_loading_stop(info);
                }
                Err(e.into())
            }
        }
    }

    pub(crate) fn on_event_reply(&mut self, id: &ViewId, pending: PendingEvent, outcome: ReplyOutcome) {
        let PendingEvent { token, loading, then } = pending;
        if let Some(token) = token {
            self.unlock(id, token);
        }
        if let Some(info) = loading {
            self.navigator.page_loading_stop(info);
        }

        match outcome {
            ReplyOutcome::Ok(payload) => {
                let mut reply = PushReply::from_payload(payload);
                let hook_reply = match reply.diff.take() {
                    Some(diff) => self.apply_diff(id, diff),
                    None => None,
                };
                if let Some(redirect) = &reply.redirect {
                    self.navigator.redirect(&redirect.to, redirect.flash.as_deref());
                }
                if let Some(patch) = &reply.live_patch {
                    self.on_live_patch(id, patch);
                }
                if let Some(redirect) = &reply.live_redirect {
                    self.on_live_redirect(redirect);
                }
                self.follow_up_ok(id, then, &reply, hook_reply);
            }
            ReplyOutcome::Error(payload) => {
                warn!(view = %id, reply = %payload, "Event rejected");
                self.follow_up_failed(id, then, false);
            }
            ReplyOutcome::Timeout => {
                warn!(view = %id, "Event timed out");
                self.follow_up_failed(id, then, true);
            }
        }
    }

    fn follow_up_ok(&mut self, id: &ViewId, then: FollowUp, reply: &PushReply, hook_reply: Option<Value>) {
        match then {
            FollowUp::None => {}
            FollowUp::HookReply { el, token } => {
                let reply = hook_reply.unwrap_or(Value::Null);
                let Some(node) = self.tree.get_mut(id) else {
                    return;
                };
                let mut commands = Vec::new();
                node.hooks
                    .call(id, &self.dom, el, &mut commands, |hook, ctx| hook.handle_reply(ctx, token, &reply));
                self.run_hook_commands(id, commands);
            }
            FollowUp::Input { input, cid, recovering } => {
                self.maybe_auto_upload(id, input, cid);
                if recovering {
                    self.continue_recovery(id);
                }
            }
            FollowUp::Preflight { input } => self.on_preflight_reply(id, input, &reply.rest),
            FollowUp::Link { link_id, href } => {
                if reply.link_redirect {
                    self.navigator.live_redirect(&href, NavKind::Push, None);
                    self.clear_pending_link(link_id);
                } else if self.clear_pending_link(link_id) {
                    if let Some(node) = self.tree.get_mut(id) {
                        node.href = Some(href);
                    }
                }
                self.apply_deferred_all();
            }
        }
    }

    fn follow_up_failed(&mut self, id: &ViewId, then: FollowUp, timeout: bool) {
        match then {
            FollowUp::Input { recovering: true, .. } => self.continue_recovery(id),
            FollowUp::Preflight { input } => self.fail_upload(id, input),
            FollowUp::Link { link_id, .. } => {
                if timeout {
                    let url = self.navigator.current_url();
                    self.navigator.redirect(&url, None);
                }
                self.clear_pending_link(link_id);
                self.apply_deferred_all();
            }
            _ => {}
        }
    }

    /// Drop the pending link if it is `link_id`
    fn clear_pending_link(&mut self, link_id: u64) -> bool {
        if self.pending_link.as_ref().is_some_and(|link| link.id == link_id) {
            self.pending_link = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn on_live_patch(&mut self, id: &ViewId, patch: &LivePatch) {
        let url = expand_url(&self.navigator.current_url(), &patch.to);
        if let Some(node) = self.tree.get_mut(id) {
            node.href = Some(url);
        }
        self.navigator.history_patch(&patch.to, patch.kind);
    }

    pub(crate) fn on_live_redirect(&mut self, redirect: &LiveRedirect) {
        let url = expand_url(&self.navigator.current_url(), &redirect.to);
        self.navigator
            .live_redirect(&url, redirect.kind, redirect.flash.as_deref());
    }

    pub(crate) fn push_input_inner(
        &mut self,
        id: &ViewId,
        input: NodeId,
        event: &str,
        cid: Option<ComponentId>,
        recovering: bool,
    ) -> ViewResult<RefToken> {
        let form = self
            .dom
            .form_of(input)
            .ok_or_else(|| ViewError::ElementNotFound(format!("form of {}", input)))?;
        let name = self.dom.attribute(input, "name").unwrap_or_default();
        let value = serialize_form(&self.dom.form_data(form), &[("_target", name.as_str())]);
        let files = self.dom.files(input);
        let upload_ref = self.dom.attribute(input, PHX_UPLOAD_REF);
        let multiple = self.dom.has_attribute(input, "multiple");

        let node = self
            .tree
            .get_mut(id)
            .ok_or_else(|| ViewError::ViewNotFound(id.clone()))?;
        if let (Some(upload_ref), false) = (&upload_ref, files.is_empty()) {
            node.uploads
                .track_files(input, &name, upload_ref, multiple, files, node.join_count);
        }
        let uploads = node.uploads.serialize_uploads(input);

        let locked = self.lock_elements(id, &[input, form], "change")?;
        let payload = EventPayload {
            kind: "form".to_string(),
            event: event.to_string(),
            value: Value::String(value),
            cid,
            uploads: Some(uploads),
        };
        self.push_with_reply(
            id,
            Some(locked),
            "event",
            payload.to_value(),
            FollowUp::Input {
                input,
                cid,
                recovering,
            },
        )?;
        Ok(locked.token)
    }

    fn push_form_submit(&mut self, id: &ViewId, form: NodeId, event: &str) -> ViewResult<()> {
        let cid = self.target_cid(id, form);
        let file_inputs = self.file_inputs(form);
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| ViewError::ViewNotFound(id.clone()))?;

        if node.uploads.in_progress(&file_inputs) {
            if node.submits.is_scheduled(form) {
                debug!(view = %id, form = %form, "Submit already waiting for uploads");
                return Ok(());
            }
            let locked = self.lock_form(id, form)?;
            if let Some(node) = self.tree.get_mut(id) {
                node.submits.schedule(ScheduledSubmit {
                    form,
                    token: locked.token,
                    event: event.to_string(),
                });
            }
            debug!(view = %id, form = %form, "Submit scheduled after uploads");
            return Ok(());
        }

        if !node.uploads.awaiting_preflight(&file_inputs).is_empty() {
            let locked = self.lock_form(id, form)?;
            let follow_up = UploadFollowUp::Submit {
                event: event.to_string(),
            };
            if !self.upload_files(id, form, locked.token, cid, follow_up) {
                self.unlock(id, locked.token);
            }
            return Ok(());
        }

        let value = serialize_form(&self.dom.form_data(form), &[]);
        let locked = self.lock_form(id, form)?;
        let payload = EventPayload {
            kind: "form".to_string(),
            event: event.to_string(),
            value: Value::String(value),
            cid,
            uploads: None,
        };
        self.push_with_reply(id, Some(locked), "event", payload.to_value(), FollowUp::None)
    }

    fn maybe_auto_upload(&mut self, id: &ViewId, input: NodeId, cid: Option<ComponentId>) {
        if !self.dom.has_attribute(input, PHX_AUTO_UPLOAD) {
            return;
        }
        let Some(form) = self.dom.form_of(input) else {
            return;
        };
        let awaiting = self
            .tree
            .get(id)
            .is_some_and(|node| !node.uploads.awaiting_preflight(&[input]).is_empty());
        if !awaiting {
            return;
        }
        let locked = match self.lock_elements(id, &[input, form], "change") {
            Ok(locked) => locked,
            Err(e) => {
                warn!(view = %id, input = %input, error = %e, "Unable to lock auto upload");
                return;
            }
        };
        if !self.upload_files(id, form, locked.token, cid, UploadFollowUp::AutoUpload { input }) {
            self.unlock(id, locked.token);
        }
    }

    /// Send the selected files of `form` to preflight under `token`
    ///
    /// Returns false if no input has files awaiting preflight.
    fn upload_files(
        &mut self,
        id: &ViewId,
        form: NodeId,
        token: RefToken,
        cid: Option<ComponentId>,
        follow_up: UploadFollowUp,
    ) -> bool {
        let file_inputs = self.file_inputs(form);
        let Some(node) = self.tree.get_mut(id) else {
            return false;
        };
        let inputs = node.uploads.awaiting_preflight(&file_inputs);
        if inputs.is_empty() {
            return false;
        }
        node.uploads
            .begin_batch(form, token, cid, inputs.clone(), follow_up);
        let requests: Vec<(NodeId, Value)> = inputs
            .iter()
            .filter_map(|input| {
                node.uploads
                    .preflight_payload(*input, cid)
                    .map(|payload| (*input, payload))
            })
            .collect();

        for (input, payload) in requests {
            debug!(view = %id, input = %input, "Requesting upload preflight");
            if let Err(e) = self.push_with_reply(id, None, "allow_upload", payload, FollowUp::Preflight { input }) {
                warn!(view = %id, input = %input, error = %e, "Preflight push failed");
                self.fail_upload(id, input);
            }
        }
        true
    }

    fn on_preflight_reply(&mut self, id: &ViewId, input: NodeId, reply: &Map<String, Value>) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        match node.uploads.apply_preflight(id, input, reply) {
            PreflightOutcome::Authorized(transfer) => match self.uploader.as_mut() {
                Some(uploader) => {
                    debug!(view = %id, input = %input, entries = transfer.entries.len(), "Upload authorized");
                    uploader.start(transfer);
                }
                None => {
                    warn!(view = %id, input = %input, "No upload adapter configured");
                    self.fail_upload(id, input);
                }
            },
            PreflightOutcome::Rejected {
                entry_ref,
                reason,
                batch,
            } => {
                warn!(view = %id, input = %input, entry_ref = %entry_ref, reason = %reason, "Upload entry rejected");
                if let Some(batch) = batch {
                    self.release_batch(id, batch);
                }
            }
            PreflightOutcome::Unknown => {
                debug!(view = %id, input = %input, "Preflight reply for an untracked input");
            }
        }
    }

    fn on_upload_progress(&mut self, id: &ViewId, input: NodeId, entry_ref: &str, progress: u8) {
        let cid = self.dom.form_of(input).and_then(|form| self.target_cid(id, form));
        let mut payload = Map::new();
        payload.insert(
            "event".to_string(),
            self.dom
                .attribute(input, self.bindings.progress())
                .map_or(Value::Null, Value::String),
        );
        payload.insert(
            "ref".to_string(),
            self.dom
                .attribute(input, PHX_UPLOAD_REF)
                .map_or(Value::Null, Value::String),
        );
        payload.insert("entry_ref".to_string(), json!(entry_ref));
        payload.insert("progress".to_string(), json!(progress));
        if let Some(cid) = cid {
            payload.insert("cid".to_string(), json!(cid));
        }
        if let Err(e) = self.push_with_reply(id, None, "progress", Value::Object(payload), FollowUp::None) {
            warn!(view = %id, input = %input, error = %e, "Unable to report upload progress");
        }

        let batch = self
            .tree
            .get_mut(id)
            .and_then(|node| node.uploads.progress(input, entry_ref, progress));
        if let Some(batch) = batch {
            self.complete_batch(id, batch);
        }
    }

    fn complete_batch(&mut self, id: &ViewId, batch: UploadBatch) {
        debug!(view = %id, form = %batch.form, "Uploads complete");
        match batch.follow_up {
            UploadFollowUp::Submit { event } => {
                let value = serialize_form(&self.dom.form_data(batch.form), &[]);
                let payload = EventPayload {
                    kind: "form".to_string(),
                    event,
                    value: Value::String(value),
                    cid: batch.cid,
                    uploads: None,
                };
                let locked = Locked {
                    token: batch.token,
                    first: Some(batch.form),
                };
                // A submit repeated during the upload is covered by this one
                let repeated = self
                    .tree
                    .get_mut(id)
                    .and_then(|node| node.submits.take(batch.form));
                if let Some(submit) = repeated {
                    if submit.token != batch.token {
                        self.unlock(id, submit.token);
                    }
                }
                if let Err(e) = self.push_with_reply(id, Some(locked), "event", payload.to_value(), FollowUp::None) {
                    warn!(view = %id, error = %e, "Unable to submit after uploads");
                }
            }
            UploadFollowUp::AutoUpload { .. } => {
                self.unlock(id, batch.token);
                self.trigger_awaiting_submit(id, batch.form);
            }
        }
    }

    fn trigger_awaiting_submit(&mut self, id: &ViewId, form: NodeId) {
        let Some(submit) = self.tree.get_mut(id).and_then(|node| node.submits.take(form)) else {
            return;
        };
        self.unlock(id, submit.token);
        if let Err(e) = self.push_form_submit(id, form, &submit.event) {
            warn!(view = %id, form = %form, error = %e, "Scheduled submit failed");
        }
    }

    /// Abandon the transfer of `input` and release its batch
    pub(crate) fn fail_upload(&mut self, id: &ViewId, input: NodeId) {
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        let transferring = node.uploads.session(input).is_some_and(|session| {
            session
                .entries
                .iter()
                .any(|entry| entry.status == EntryStatus::Transferring)
        });
        let batch = node.uploads.fail(input);
        if transferring {
            if let Some(uploader) = self.uploader.as_mut() {
                uploader.cancel(id, input);
            }
        }
        if let Some(batch) = batch {
            self.release_batch(id, batch);
        }
    }

    /// Cancel transfers and release batches an earlier join left behind
    pub(crate) fn abandon_uploads(&mut self, id: &ViewId, transferring: &[NodeId], batches: Vec<UploadBatch>) {
        if let Some(uploader) = self.uploader.as_mut() {
            for input in transferring {
                uploader.cancel(id, *input);
            }
        }
        for batch in batches {
            debug!(view = %id, form = %batch.form, "Releasing uploads of a previous join");
            self.release_batch(id, batch);
        }
    }

    /// Unlock a batch and drop the submit waiting on its form
    fn release_batch(&mut self, id: &ViewId, batch: UploadBatch) {
        self.unlock(id, batch.token);
        let scheduled = self
            .tree
            .get_mut(id)
            .and_then(|node| node.submits.take(batch.form));
        if let Some(submit) = scheduled {
            if submit.token != batch.token {
                self.unlock(id, submit.token);
            }
        }
    }

    pub(crate) fn run_hook_commands(&mut self, id: &ViewId, commands: Vec<HookCommand>) {
        for command in commands {
            match command {
                HookCommand::PushEvent { el, event, payload } => {
                    if let Err(e) = self.push_hook_event(id, el, &event, payload) {
                        warn!(view = %id, event = %event, error = %e, "Unable to push hook event");
                    }
                }
            }
        }
    }
}
