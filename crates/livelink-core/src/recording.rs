//! Recording collaborators for testing
//!
//! Each type is a cheap handle over shared state: hand one clone to the
//! engine and keep another to inspect what happened.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::identity::{NodeId, ViewId};
use crate::protocol::NavKind;
use crate::traits::{Clock, Navigator, PageLoading, UploadAdapter, UploadTransfer};

/// A page-level effect requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    Redirect {
        to: String,
        flash: Option<String>,
    },
    LiveRedirect {
        to: String,
        kind: NavKind,
        flash: Option<String>,
    },
    HistoryPatch {
        to: String,
        kind: NavKind,
    },
    Reload,
    PageLoadingStart(PageLoading),
    PageLoadingStop(PageLoading),
    WindowEvent {
        name: String,
        detail: Value,
    },
    Title(String),
    Joined {
        view: ViewId,
        join_count: u32,
    },
}

#[derive(Debug, Default)]
struct NavState {
    events: Vec<NavEvent>,
    unloaded: bool,
    url: String,
    params: Map<String, Value>,
}

/// Navigator that records every effect
#[derive(Debug, Clone, Default)]
pub struct RecordingNavigator {
    state: Arc<Mutex<NavState>>,
}

impl RecordingNavigator {
    pub fn new(url: impl Into<String>) -> Self {
        let navigator = Self::default();
        navigator.state.lock().url = url.into();
        navigator
    }

    /// Boxed handle for the engine
    pub fn boxed(&self) -> Box<dyn Navigator> {
        Box::new(self.clone())
    }

    pub fn events(&self) -> Vec<NavEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear(&self) {
        self.state.lock().events.clear();
    }

    pub fn set_unloaded(&self, unloaded: bool) {
        self.state.lock().unloaded = unloaded;
    }

    pub fn set_connect_params(&self, params: Map<String, Value>) {
        self.state.lock().params = params;
    }

    fn record(&self, event: NavEvent) {
        self.state.lock().events.push(event);
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&mut self, to: &str, flash: Option<&str>) {
        self.record(NavEvent::Redirect {
            to: to.to_string(),
            flash: flash.map(str::to_string),
        });
    }

    fn live_redirect(&mut self, to: &str, kind: NavKind, flash: Option<&str>) {
        self.record(NavEvent::LiveRedirect {
            to: to.to_string(),
            kind,
            flash: flash.map(str::to_string),
        });
    }

    fn history_patch(&mut self, to: &str, kind: NavKind) {
        {
            let mut state = self.state.lock();
            state.url = to.to_string();
        }
        self.record(NavEvent::HistoryPatch {
            to: to.to_string(),
            kind,
        });
    }

    fn reload(&mut self) {
        self.record(NavEvent::Reload);
    }

    fn page_loading_start(&mut self, info: PageLoading) {
        self.record(NavEvent::PageLoadingStart(info));
    }

    fn page_loading_stop(&mut self, info: PageLoading) {
        self.record(NavEvent::PageLoadingStop(info));
    }

    fn dispatch_event(&mut self, name: &str, detail: &Value) {
        self.record(NavEvent::WindowEvent {
            name: name.to_string(),
            detail: detail.clone(),
        });
    }

    fn put_title(&mut self, title: &str) {
        self.record(NavEvent::Title(title.to_string()));
    }

    fn current_url(&self) -> String {
        self.state.lock().url.clone()
    }

    fn is_unloaded(&self) -> bool {
        self.state.lock().unloaded
    }

    fn connect_params(&self, _view_name: Option<&str>) -> Map<String, Value> {
        self.state.lock().params.clone()
    }

    fn joined(&mut self, view: &ViewId, join_count: u32) {
        self.record(NavEvent::Joined {
            view: view.clone(),
            join_count,
        });
    }
}

#[derive(Debug, Default)]
struct UploadState {
    started: Vec<UploadTransfer>,
    cancelled: Vec<(ViewId, NodeId)>,
}

/// Upload adapter that records transfer requests
#[derive(Debug, Clone, Default)]
pub struct RecordingUploadAdapter {
    state: Arc<Mutex<UploadState>>,
}

impl RecordingUploadAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn UploadAdapter> {
        Box::new(self.clone())
    }

    pub fn started(&self) -> Vec<UploadTransfer> {
        self.state.lock().started.clone()
    }

    pub fn cancelled(&self) -> Vec<(ViewId, NodeId)> {
        self.state.lock().cancelled.clone()
    }
}

impl UploadAdapter for RecordingUploadAdapter {
    fn start(&mut self, transfer: UploadTransfer) {
        self.state.lock().started.push(transfer);
    }

    fn cancel(&mut self, view: &ViewId, input: NodeId) {
        self.state.lock().cancelled.push((view.clone(), input));
    }
}

/// Clock advanced by hand
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn boxed(&self) -> Box<dyn Clock> {
        Box::new(self.clone())
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigator_records_through_clones() {
        let navigator = RecordingNavigator::new("http://localhost/");
        let mut boxed = navigator.boxed();
        boxed.history_patch("/items", NavKind::Replace);
        boxed.reload();

        assert_eq!(navigator.current_url(), "/items");
        assert_eq!(
            navigator.events(),
            vec![
                NavEvent::HistoryPatch {
                    to: "/items".to_string(),
                    kind: NavKind::Replace
                },
                NavEvent::Reload
            ]
        );
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }
}
