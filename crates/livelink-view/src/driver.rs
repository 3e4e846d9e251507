//! Async driver for a [`LiveSocket`]
//!
//! The engine itself performs no I/O. The driver owns it on a tokio task,
//! feeds it channel events, user actions and upload reports from an mpsc
//! queue, and sleeps until the next timer deadline in between.

use livelink_core::{ChannelEvent, Dom, NodeId, UploadReport, ViewId};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn};

use crate::error::{ViewError, ViewResult};
use crate::socket::LiveSocket;

/// User-initiated work for the engine
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    ConnectRoot {
        id: ViewId,
        flash: Option<String>,
    },
    PushEvent {
        kind: String,
        el: NodeId,
        event: String,
        meta: Map<String, Value>,
    },
    PushInput {
        input: NodeId,
        event: String,
    },
    SubmitForm {
        form: NodeId,
        event: String,
    },
    PushHookEvent {
        view: ViewId,
        el: NodeId,
        event: String,
        payload: Value,
    },
    LinkPatch {
        href: String,
        target: Option<NodeId>,
    },
    Destroy(ViewId),
}

impl UserAction {
    fn name(&self) -> &'static str {
        match self {
            UserAction::ConnectRoot { .. } => "connect_root",
            UserAction::PushEvent { .. } => "push_event",
            UserAction::PushInput { .. } => "push_input",
            UserAction::SubmitForm { .. } => "submit_form",
            UserAction::PushHookEvent { .. } => "push_hook_event",
            UserAction::LinkPatch { .. } => "link_patch",
            UserAction::Destroy(_) => "destroy",
        }
    }
}

/// Everything the driver feeds into the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SocketInput {
    Channel(ChannelEvent),
    Action(UserAction),
    Upload(UploadReport),
}

impl<D: Dom> LiveSocket<D> {
    /// Apply one input; action failures are logged
    pub fn handle_input(&mut self, input: SocketInput) {
        match input {
            SocketInput::Channel(event) => self.handle_channel_event(event),
            SocketInput::Upload(report) => self.handle_upload_report(report),
            SocketInput::Action(action) => {
                let name = action.name();
                if let Err(e) = self.apply_action(action) {
                    warn!(action = name, error = %e, "Action failed");
                }
            }
        }
    }

    fn apply_action(&mut self, action: UserAction) -> ViewResult<()> {
        match action {
            UserAction::ConnectRoot { id, flash } => self.connect_root(&id, flash),
            UserAction::PushEvent {
                kind,
                el,
                event,
                meta,
            } => self.push_event(&kind, el, &event, meta).map(|_| ()),
            UserAction::PushInput { input, event } => self.push_input(input, &event).map(|_| ()),
            UserAction::SubmitForm { form, event } => self.submit_form(form, &event),
            UserAction::PushHookEvent {
                view,
                el,
                event,
                payload,
            } => self.push_hook_event(&view, el, &event, payload).map(|_| ()),
            UserAction::LinkPatch { href, target } => self.push_link_patch(&href, target).map(|_| ()),
            UserAction::Destroy(id) => self.destroy_view(&id),
        }
    }
}

/// Cloneable handle feeding a running [`SocketDriver`]
#[derive(Debug, Clone)]
pub struct SocketHandle {
    input_tx: mpsc::UnboundedSender<SocketInput>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SocketHandle {
    pub fn send(&self, input: SocketInput) -> ViewResult<()> {
        self.input_tx.send(input).map_err(|_| ViewError::DriverStopped)
    }

    pub fn channel_event(&self, event: ChannelEvent) -> ViewResult<()> {
        self.send(SocketInput::Channel(event))
    }

    pub fn action(&self, action: UserAction) -> ViewResult<()> {
        self.send(SocketInput::Action(action))
    }

    pub fn upload_report(&self, report: UploadReport) -> ViewResult<()> {
        self.send(SocketInput::Upload(report))
    }

    /// Stop the driver after the input it is handling
    pub fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Driver already stopped");
        }
    }
}

/// Owns a [`LiveSocket`] and runs it on the tokio runtime
pub struct SocketDriver<D: Dom> {
    socket: LiveSocket<D>,
    input_rx: mpsc::UnboundedReceiver<SocketInput>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<D: Dom> SocketDriver<D> {
    pub fn new(socket: LiveSocket<D>) -> (Self, SocketHandle) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let driver = Self {
            socket,
            input_rx,
            shutdown_rx,
        };
        (
            driver,
            SocketHandle {
                input_tx,
                shutdown_tx,
            },
        )
    }

    /// Run until shutdown or until every handle is dropped
    ///
    /// Returns the engine so its final state can be inspected.
    pub async fn run(mut self) -> LiveSocket<D> {
        info!(instance = %self.socket.instance_id(), "Socket driver started");

        loop {
            let deadline = self.socket.next_deadline();
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Socket driver shutting down");
                    break;
                }
                input = self.input_rx.recv() => match input {
                    Some(input) => self.socket.handle_input(input),
                    None => {
                        info!("All socket handles dropped");
                        break;
                    }
                },
                _ = sleep_until(deadline) => self.socket.fire_due_timers(),
            }
        }
        self.socket
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(TokioInstant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_handle_stops_driver() {
        use livelink_core::{MarkupRenderedFactory, MemoryDom, MockChannelHub, RecordingNavigator};

        let hub = MockChannelHub::new();
        let socket = LiveSocket::builder(MemoryDom::new())
            .channels(hub.factory())
            .rendered(Box::new(MarkupRenderedFactory))
            .navigator(RecordingNavigator::new("http://localhost/").boxed())
            .build()
            .unwrap();
        let (driver, handle) = SocketDriver::new(socket);
        drop(handle);

        let socket = driver.run().await;
        assert!(socket.tree().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        use livelink_core::{MarkupRenderedFactory, MemoryDom, MockChannelHub, RecordingNavigator};

        let hub = MockChannelHub::new();
        let socket = LiveSocket::builder(MemoryDom::new())
            .channels(hub.factory())
            .rendered(Box::new(MarkupRenderedFactory))
            .navigator(RecordingNavigator::new("http://localhost/").boxed())
            .build()
            .unwrap();
        let (driver, handle) = SocketDriver::new(socket);
        handle.shutdown();
        drop(driver.run().await);

        let result = handle.action(UserAction::Destroy(ViewId::new("root")));
        assert!(matches!(result, Err(ViewError::DriverStopped)));
    }
}
