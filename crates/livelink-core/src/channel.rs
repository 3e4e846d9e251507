//! Transport channel contract
//!
//! A view talks to the server over one channel per topic (`lv:<view-id>`).
//! Channels are push-based: every outbound operation returns a [`PushRef`]
//! immediately, and the outcome arrives later as a [`ChannelEvent`] delivered
//! to the engine by whoever owns the transport. Timeouts are the transport's
//! responsibility; a push that times out produces a
//! [`ReplyOutcome::Timeout`] reply.

use std::time::Duration;

use serde_json::Value;

use crate::error::ChannelError;
use crate::identity::PushRef;
use crate::protocol::JoinParams;

/// A single view channel
pub trait Channel: Send {
    /// Topic of this channel
    fn topic(&self) -> &str;

    /// Request a join; the reply carries the mount diff or a join failure
    fn join(&mut self, params: JoinParams) -> Result<PushRef, ChannelError>;

    /// Push an event; `None` disables the transport timeout
    fn push(
        &mut self,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<PushRef, ChannelError>;

    /// Leave the topic; the reply (ok, error or timeout) completes the leave
    fn leave(&mut self) -> Result<PushRef, ChannelError>;

    /// True if the transport is connected and the topic joined
    fn can_push(&self) -> bool;
}

/// Opens channels by topic
pub trait ChannelFactory: Send {
    fn channel(&mut self, topic: &str) -> Box<dyn Channel>;
}

/// Outcome of a push, join or leave
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Ok(Value),
    Error(Value),
    Timeout,
}

/// Why a channel closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client left the topic
    Leave,
    /// The server or transport closed the topic
    Other(String),
}

impl CloseReason {
    /// True for a clean leave
    pub fn is_leave(&self) -> bool {
        matches!(self, CloseReason::Leave)
    }
}

/// What happened on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    /// Reply to an earlier join, push or leave
    Reply {
        push_ref: PushRef,
        outcome: ReplyOutcome,
    },
    /// Server-initiated message
    Message { event: String, payload: Value },
    /// The channel closed
    Close { reason: CloseReason },
    /// The transport failed
    Error { reason: String },
}

/// An inbound channel event addressed by topic
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub topic: String,
    pub kind: ChannelEventKind,
}

impl ChannelEvent {
    pub fn reply(topic: impl Into<String>, push_ref: PushRef, outcome: ReplyOutcome) -> Self {
        Self {
            topic: topic.into(),
            kind: ChannelEventKind::Reply { push_ref, outcome },
        }
    }

    pub fn message(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            kind: ChannelEventKind::Message {
                event: event.into(),
                payload,
            },
        }
    }

    pub fn close(topic: impl Into<String>, reason: CloseReason) -> Self {
        Self {
            topic: topic.into(),
            kind: ChannelEventKind::Close { reason },
        }
    }

    pub fn error(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: ChannelEventKind::Error {
                reason: reason.into(),
            },
        }
    }
}
