//! Mock channel implementation for testing
//!
//! Every channel opened through a [`MockChannelHub`] records its joins,
//! pushes and leaves in shared state. Tests inspect the recorded traffic and
//! build the inbound [`ChannelEvent`]s the engine should see next.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let hub = MockChannelHub::new();
//! let mut socket = LiveSocket::builder(dom).channels(hub.factory()).build()?;
//! socket.connect_root(&ViewId::new("root"), None)?;
//!
//! let event = hub.join_ok("lv:root", json!({"rendered": diff}));
//! socket.handle_channel_event(event);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::channel::{Channel, ChannelEvent, ChannelFactory, CloseReason, ReplyOutcome};
use crate::error::ChannelError;
use crate::identity::PushRef;
use crate::protocol::JoinParams;

/// An outbound operation recorded by the hub
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Join {
        topic: String,
        push_ref: PushRef,
        params: JoinParams,
    },
    Push {
        topic: String,
        push_ref: PushRef,
        event: String,
        payload: Value,
    },
    Leave {
        topic: String,
        push_ref: PushRef,
    },
}

impl Outbound {
    pub fn topic(&self) -> &str {
        match self {
            Outbound::Join { topic, .. } | Outbound::Push { topic, .. } | Outbound::Leave { topic, .. } => {
                topic
            }
        }
    }

    pub fn push_ref(&self) -> PushRef {
        match self {
            Outbound::Join { push_ref, .. } | Outbound::Push { push_ref, .. } | Outbound::Leave { push_ref, .. } => {
                *push_ref
            }
        }
    }
}

#[derive(Debug, Default)]
struct HubState {
    next_ref: u64,
    disconnected: bool,
    joined: HashMap<String, bool>,
    outbound: Vec<Outbound>,
}

impl HubState {
    fn next_ref(&mut self) -> PushRef {
        self.next_ref += 1;
        PushRef(self.next_ref)
    }
}

/// Shared state behind every mock channel
#[derive(Debug, Clone, Default)]
pub struct MockChannelHub {
    state: Arc<Mutex<HubState>>,
}

impl MockChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel factory backed by this hub
    pub fn factory(&self) -> Box<dyn ChannelFactory> {
        Box::new(MockChannelFactory {
            state: Arc::clone(&self.state),
        })
    }

    /// Simulate the transport going up or down
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().disconnected = !connected;
    }

    /// Every recorded operation in order
    pub fn outbound(&self) -> Vec<Outbound> {
        self.state.lock().outbound.clone()
    }

    /// Recorded joins as (topic, ref, params)
    pub fn joins(&self) -> Vec<(String, PushRef, JoinParams)> {
        self.state
            .lock()
            .outbound
            .iter()
            .filter_map(|op| match op {
                Outbound::Join {
                    topic,
                    push_ref,
                    params,
                } => Some((topic.clone(), *push_ref, params.clone())),
                _ => None,
            })
            .collect()
    }

    /// Recorded pushes on `topic` as (ref, event, payload)
    pub fn pushes(&self, topic: &str) -> Vec<(PushRef, String, Value)> {
        self.state
            .lock()
            .outbound
            .iter()
            .filter_map(|op| match op {
                Outbound::Push {
                    topic: t,
                    push_ref,
                    event,
                    payload,
                } if t == topic => Some((*push_ref, event.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Recorded pushes of `event` on `topic`
    pub fn pushes_of(&self, topic: &str, event: &str) -> Vec<(PushRef, Value)> {
        self.pushes(topic)
            .into_iter()
            .filter(|(_, e, _)| e == event)
            .map(|(r, _, p)| (r, p))
            .collect()
    }

    /// Most recent push of `event` on `topic`
    pub fn last_push(&self, topic: &str, event: &str) -> Option<(PushRef, Value)> {
        self.pushes_of(topic, event).pop()
    }

    /// Topics that have been left, in order
    pub fn leaves(&self) -> Vec<(String, PushRef)> {
        self.state
            .lock()
            .outbound
            .iter()
            .filter_map(|op| match op {
                Outbound::Leave { topic, push_ref } => Some((topic.clone(), *push_ref)),
                _ => None,
            })
            .collect()
    }

    /// Ref of the most recent join on `topic`
    pub fn last_join_ref(&self, topic: &str) -> Option<PushRef> {
        self.joins()
            .into_iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, r, _)| r)
    }

    /// Count of joins on `topic`
    pub fn join_count(&self, topic: &str) -> usize {
        self.joins().iter().filter(|(t, _, _)| t == topic).count()
    }

    /// Ok reply to the latest join on `topic`; marks the topic joined
    pub fn join_ok(&self, topic: &str, payload: Value) -> ChannelEvent {
        let push_ref = self.last_join_ref(topic).unwrap_or(PushRef(0));
        self.state.lock().joined.insert(topic.to_string(), true);
        ChannelEvent::reply(topic, push_ref, ReplyOutcome::Ok(payload))
    }

    /// Ok reply to the latest join carrying only a mount diff
    pub fn join_rendered(&self, topic: &str, rendered: Value) -> ChannelEvent {
        self.join_ok(topic, json!({ "rendered": rendered }))
    }

    /// Error reply to the latest join on `topic`
    pub fn join_error(&self, topic: &str, payload: Value) -> ChannelEvent {
        let push_ref = self.last_join_ref(topic).unwrap_or(PushRef(0));
        ChannelEvent::reply(topic, push_ref, ReplyOutcome::Error(payload))
    }

    /// Reply to an arbitrary push
    pub fn reply(&self, topic: &str, push_ref: PushRef, outcome: ReplyOutcome) -> ChannelEvent {
        ChannelEvent::reply(topic, push_ref, outcome)
    }

    /// Ok reply to a push
    pub fn reply_ok(&self, topic: &str, push_ref: PushRef, payload: Value) -> ChannelEvent {
        self.reply(topic, push_ref, ReplyOutcome::Ok(payload))
    }

    /// Server-initiated message
    pub fn message(&self, topic: &str, event: &str, payload: Value) -> ChannelEvent {
        ChannelEvent::message(topic, event, payload)
    }

    /// Channel close; marks the topic unjoined
    pub fn close(&self, topic: &str, reason: CloseReason) -> ChannelEvent {
        self.state.lock().joined.insert(topic.to_string(), false);
        ChannelEvent::close(topic, reason)
    }

    /// Transport error; marks the topic unjoined
    pub fn error(&self, topic: &str, reason: &str) -> ChannelEvent {
        self.state.lock().joined.insert(topic.to_string(), false);
        ChannelEvent::error(topic, reason)
    }
}

/// Factory opening [`MockChannel`]s on a shared hub
pub struct MockChannelFactory {
    state: Arc<Mutex<HubState>>,
}

impl ChannelFactory for MockChannelFactory {
    fn channel(&mut self, topic: &str) -> Box<dyn Channel> {
        Box::new(MockChannel {
            topic: topic.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

/// A channel that records traffic on its hub
pub struct MockChannel {
    topic: String,
    state: Arc<Mutex<HubState>>,
}

impl Channel for MockChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn join(&mut self, params: JoinParams) -> Result<PushRef, ChannelError> {
        let mut state = self.state.lock();
        let push_ref = state.next_ref();
        state.outbound.push(Outbound::Join {
            topic: self.topic.clone(),
            push_ref,
            params,
        });
        Ok(push_ref)
    }

    fn push(
        &mut self,
        event: &str,
        payload: Value,
        _timeout: Option<Duration>,
    ) -> Result<PushRef, ChannelError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(ChannelError::NotJoined(self.topic.clone()));
        }
        let push_ref = state.next_ref();
        state.outbound.push(Outbound::Push {
            topic: self.topic.clone(),
            push_ref,
            event: event.to_string(),
            payload,
        });
        Ok(push_ref)
    }

    fn leave(&mut self) -> Result<PushRef, ChannelError> {
        let mut state = self.state.lock();
        let push_ref = state.next_ref();
        state.joined.insert(self.topic.clone(), false);
        state.outbound.push(Outbound::Leave {
            topic: self.topic.clone(),
            push_ref,
        });
        Ok(push_ref)
    }

    fn can_push(&self) -> bool {
        let state = self.state.lock();
        !state.disconnected && state.joined.get(&self.topic).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> JoinParams {
        JoinParams {
            url: None,
            params: Default::default(),
            session: "s".to_string(),
            static_token: None,
            flash: None,
        }
    }

    #[test]
    fn test_records_traffic_in_order() {
        let hub = MockChannelHub::new();
        let mut factory = hub.factory();
        let mut channel = factory.channel("lv:a");

        let join_ref = channel.join(params()).unwrap();
        assert!(!channel.can_push());

        hub.join_ok("lv:a", json!({}));
        assert!(channel.can_push());

        let push_ref = channel.push("event", json!({"x": 1}), None).unwrap();
        assert!(push_ref > join_ref);
        assert_eq!(hub.last_push("lv:a", "event"), Some((push_ref, json!({"x": 1}))));

        channel.leave().unwrap();
        assert!(!channel.can_push());
        assert_eq!(hub.leaves().len(), 1);
        assert_eq!(hub.outbound().len(), 3);
    }

    #[test]
    fn test_disconnected_push_fails() {
        let hub = MockChannelHub::new();
        let mut channel = hub.factory().channel("lv:a");
        hub.set_connected(false);
        assert!(channel.push("event", json!({}), None).is_err());
        assert!(!channel.can_push());
    }
}
