//! Upload Flow Tests
//!
//! File inputs are tracked on change events, sent to preflight on submit or
//! auto upload, and handed to the upload adapter once authorized. Progress
//! reports flow back through the socket until the batch completes.

use std::time::Duration;

use livelink_core::constants::{PHX_AUTO_UPLOAD, PHX_REF, PHX_SESSION, PHX_UPLOAD_REF};
use livelink_core::{
    CloseReason, Dom, FileInfo, Flag, ManualClock, Markup, MarkupElement, MarkupRenderedFactory,
    MemoryDom, MockChannelHub, NodeId, PushRef, RecordingNavigator, RecordingUploadAdapter,
    UploadReport, UploadReportKind, ViewId, markup_diff,
};
use livelink_view::LiveSocket;
use serde_json::{Value, json};

// ============================================================================
// Test Harness
// ============================================================================

struct UploadHarness {
    socket: LiveSocket<MemoryDom>,
    hub: MockChannelHub,
    uploads: RecordingUploadAdapter,
    clock: ManualClock,
}

fn root() -> ViewId {
    ViewId::new("root")
}

/// Avatar form; `auto` uploads as soon as files are selected
fn avatar_form(auto: bool) -> Markup {
    let mut input = MarkupElement::new("input")
        .with_attr("id", "avatar")
        .with_attr("type", "file")
        .with_attr("name", "avatar")
        .with_attr(PHX_UPLOAD_REF, "phx-ref-1");
    if auto {
        input = input.with_attr(PHX_AUTO_UPLOAD, "");
    }
    Markup::from_elements([MarkupElement::new("form")
        .with_attr("id", "profile")
        .with_attr("phx-change", "validate")
        .with_attr("phx-submit", "save")
        .with_child(
            MarkupElement::new("input")
                .with_attr("id", "nick")
                .with_attr("name", "nick")
                .with_attr("value", "ada"),
        )
        .with_child(input)
        .with_child(
            MarkupElement::new("button")
                .with_attr("id", "go")
                .with_attr("type", "submit"),
        )])
}

impl UploadHarness {
    fn new(auto: bool) -> Self {
        let mut dom = MemoryDom::new();
        let body = dom.body();
        dom.append(
            body,
            &MarkupElement::new("div")
                .with_attr("id", "root")
                .with_attr(PHX_SESSION, "signed"),
        );
        let hub = MockChannelHub::new();
        let uploads = RecordingUploadAdapter::new();
        let clock = ManualClock::new();
        let mut socket = LiveSocket::builder(dom)
            .channels(hub.factory())
            .rendered(Box::new(MarkupRenderedFactory))
            .navigator(RecordingNavigator::new("http://localhost/profile").boxed())
            .uploads(uploads.boxed())
            .clock(clock.boxed())
            .build()
            .unwrap();
        socket.connect_root(&root(), None).unwrap();
        socket.handle_channel_event(hub.join_rendered("lv:root", markup_diff(Some(&avatar_form(auto)), &[])));
        Self {
            socket,
            hub,
            uploads,
            clock,
        }
    }

    fn el(&self, id: &str) -> NodeId {
        self.socket.dom().element_by_id(id).unwrap()
    }

    fn reply_ok(&mut self, push_ref: PushRef, payload: Value) {
        self.socket
            .handle_channel_event(self.hub.reply_ok("lv:root", push_ref, payload));
    }

    fn last_push(&self, event: &str) -> (PushRef, Value) {
        self.hub.last_push("lv:root", event).unwrap()
    }

    /// Select a file and acknowledge the change event
    fn select_file(&mut self) {
        let input = self.el("avatar");
        self.socket
            .dom_mut()
            .set_files(input, vec![FileInfo::new("me.png", 2048, "image/png")]);
        self.socket.push_input(input, "validate").unwrap();
        let (push_ref, _) = self.last_push("event");
        self.reply_ok(push_ref, json!({}));
    }

    /// Authorize the pending preflight; returns the entry ref
    fn authorize(&mut self) -> String {
        let (push_ref, payload) = self.last_push("allow_upload");
        let entry_ref = payload["entries"][0]["ref"].as_str().unwrap().to_string();
        self.reply_ok(
            push_ref,
            json!({
                "config": {"chunk_size": 64000},
                "entries": {(entry_ref.as_str()): {"uploader": "direct"}},
            }),
        );
        entry_ref
    }

    /// Drop the channel and answer the reconnect with a fresh render
    fn reconnect(&mut self) {
        self.socket
            .handle_channel_event(self.hub.close("lv:root", CloseReason::Other("transport".to_string())));
        self.clock.advance(Duration::from_secs(3));
        self.socket.fire_due_timers();
        assert_eq!(self.hub.join_count("lv:root"), 2);
        self.socket.handle_channel_event(
            self.hub
                .join_rendered("lv:root", markup_diff(Some(&avatar_form(false)), &[])),
        );
    }

    fn report(&mut self, kind: UploadReportKind) {
        let transfer = self.uploads.started().pop().unwrap();
        self.socket.handle_upload_report(UploadReport {
            view: transfer.view,
            input: transfer.input,
            join_count: transfer.join_count,
            kind,
        });
    }

    fn progress(&mut self, entry_ref: &str, progress: u8) {
        self.report(UploadReportKind::Progress {
            entry_ref: entry_ref.to_string(),
            progress,
        });
    }

    fn submits(&self) -> usize {
        self.hub
            .pushes_of("lv:root", "event")
            .iter()
            .filter(|(_, payload)| payload["event"] == "save")
            .count()
    }
}

// ============================================================================
// Submit With Uploads
// ============================================================================

#[test]
fn test_change_event_carries_selected_files() {
    let mut h = UploadHarness::new(false);
    h.select_file();

    let (_, payload) = h.hub.pushes_of("lv:root", "event").pop().unwrap();
    let entries = &payload["uploads"]["phx-ref-1"];
    assert_eq!(entries[0]["name"], "me.png");
    assert_eq!(entries[0]["path"], "avatar");
    assert_eq!(entries[0]["size"], 2048);
    assert!(h.hub.pushes_of("lv:root", "allow_upload").is_empty());
}

#[test]
fn test_submit_uploads_then_pushes_form() {
    let mut h = UploadHarness::new(false);
    h.select_file();
    let (form, avatar) = (h.el("profile"), h.el("avatar"));

    h.socket.submit_form(form, "save").unwrap();
    assert_eq!(h.submits(), 0);
    assert!(h.socket.dom().has_attribute(form, PHX_REF));
    assert!(h.socket.dom().flag(avatar, Flag::Disabled));

    let (_, preflight) = h.last_push("allow_upload");
    assert_eq!(preflight["ref"], "phx-ref-1");
    assert_eq!(preflight["entries"][0]["type"], "image/png");

    let entry_ref = h.authorize();
    let started = h.uploads.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].entries[0].entry_ref, entry_ref);
    assert_eq!(started[0].entries[0].meta, json!({"uploader": "direct"}));
    assert_eq!(started[0].config["chunk_size"], 64000);

    h.progress(&entry_ref, 50);
    let (_, progress) = h.last_push("progress");
    assert_eq!(
        progress,
        json!({"event": null, "ref": "phx-ref-1", "entry_ref": entry_ref, "progress": 50})
    );
    assert_eq!(h.submits(), 0);

    h.progress(&entry_ref, 100);
    assert_eq!(h.submits(), 1);
    let (submit_ref, submit) = h.last_push("event");
    assert_eq!(submit["value"], "nick=ada");

    // The form stays locked until the submit itself is answered
    assert!(h.socket.dom().has_attribute(form, PHX_REF));
    h.reply_ok(submit_ref, json!({}));
    assert!(!h.socket.dom().has_attribute(form, PHX_REF));
    assert!(!h.socket.dom().flag(avatar, Flag::Disabled));
}

#[test]
fn test_rejected_preflight_unlocks_form() {
    let mut h = UploadHarness::new(false);
    h.select_file();
    let form = h.el("profile");
    h.socket.submit_form(form, "save").unwrap();

    let (push_ref, payload) = h.last_push("allow_upload");
    let entry_ref = payload["entries"][0]["ref"].clone();
    h.reply_ok(push_ref, json!({"error": [entry_ref, "too_large"]}));

    assert!(h.uploads.started().is_empty());
    assert!(!h.socket.dom().has_attribute(form, PHX_REF));
    assert!(h.socket.view(&root()).unwrap().outstanding_locks().is_empty());
    assert_eq!(h.submits(), 0);
}

#[test]
fn test_adapter_error_cancels_transfer() {
    let mut h = UploadHarness::new(false);
    h.select_file();
    let (form, avatar) = (h.el("profile"), h.el("avatar"));
    h.socket.submit_form(form, "save").unwrap();
    h.authorize();

    h.report(UploadReportKind::Error {
        reason: "network".to_string(),
    });

    assert_eq!(h.uploads.cancelled(), vec![(root(), avatar)]);
    assert!(!h.socket.dom().has_attribute(form, PHX_REF));
    assert!(h.socket.view(&root()).unwrap().uploads().session(avatar).is_none());
    assert_eq!(h.submits(), 0);
}

#[test]
fn test_report_from_previous_join_is_ignored() {
    let mut h = UploadHarness::new(false);
    h.select_file();
    h.socket.submit_form(h.el("profile"), "save").unwrap();
    let entry_ref = h.authorize();

    let transfer = h.uploads.started().pop().unwrap();
    h.socket.handle_upload_report(UploadReport {
        view: transfer.view,
        input: transfer.input,
        join_count: transfer.join_count + 1,
        kind: UploadReportKind::Progress {
            entry_ref,
            progress: 100,
        },
    });

    assert!(h.hub.pushes_of("lv:root", "progress").is_empty());
    assert_eq!(h.submits(), 0);
}

#[test]
fn test_repeated_submit_during_upload_is_released() {
    let mut h = UploadHarness::new(false);
    h.select_file();
    let form = h.el("profile");

    h.socket.submit_form(form, "save").unwrap();
    h.socket.submit_form(form, "save").unwrap();
    assert!(h.socket.view(&root()).unwrap().has_scheduled_submit(form));

    let entry_ref = h.authorize();
    h.progress(&entry_ref, 100);
    assert_eq!(h.submits(), 1);
    assert!(!h.socket.view(&root()).unwrap().has_scheduled_submit(form));

    let (submit_ref, _) = h.last_push("event");
    h.reply_ok(submit_ref, json!({}));
    assert!(h.socket.view(&root()).unwrap().outstanding_locks().is_empty());
    assert!(!h.socket.dom().has_attribute(form, PHX_REF));
}

#[test]
fn test_reconnect_releases_interrupted_upload() {
    let mut h = UploadHarness::new(false);
    h.select_file();
    let (form, avatar) = (h.el("profile"), h.el("avatar"));
    h.socket.submit_form(form, "save").unwrap();
    h.authorize();

    h.reconnect();

    assert_eq!(h.uploads.cancelled(), vec![(root(), avatar)]);
    let view = h.socket.view(&root()).unwrap();
    assert!(view.uploads().session(avatar).is_none());
    assert!(!view.has_scheduled_submit(form));

    // The form is recovered before the rejoin completes
    let (recover_ref, recover) = h.last_push("event");
    assert_eq!(recover["event"], "validate");
    h.reply_ok(recover_ref, json!({}));
    assert!(h.socket.view(&root()).unwrap().outstanding_locks().is_empty());

    let form = h.el("profile");
    h.socket.submit_form(form, "save").unwrap();
    assert_eq!(h.submits(), 1);
    let (submit_ref, _) = h.last_push("event");
    h.reply_ok(submit_ref, json!({}));
    assert!(!h.socket.dom().has_attribute(form, PHX_REF));
    assert!(h.socket.view(&root()).unwrap().outstanding_locks().is_empty());
}

// ============================================================================
// Auto Upload
// ============================================================================

#[test]
fn test_auto_upload_starts_after_change() {
    let mut h = UploadHarness::new(true);
    h.select_file();

    assert_eq!(h.hub.pushes_of("lv:root", "allow_upload").len(), 1);
    let avatar = h.el("avatar");
    assert!(h.socket.dom().has_class(avatar, "phx-change-loading"));

    let entry_ref = h.authorize();
    h.progress(&entry_ref, 100);

    assert!(!h.socket.dom().has_attribute(avatar, PHX_REF));
    assert_eq!(h.submits(), 0);
}

#[test]
fn test_submit_during_auto_upload_fires_once() {
    let mut h = UploadHarness::new(true);
    h.select_file();
    let form = h.el("profile");

    h.socket.submit_form(form, "save").unwrap();
    h.socket.submit_form(form, "save").unwrap();
    assert!(h.socket.view(&root()).unwrap().has_scheduled_submit(form));
    assert_eq!(h.submits(), 0);

    let entry_ref = h.authorize();
    h.progress(&entry_ref, 100);

    assert_eq!(h.submits(), 1);
    assert!(!h.socket.view(&root()).unwrap().has_scheduled_submit(form));

    // A late duplicate report has nothing left to complete
    h.progress(&entry_ref, 100);
    assert_eq!(h.submits(), 1);
}
