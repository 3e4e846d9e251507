//! Wire envelopes consumed and produced by the view engine
//!
//! Only the envelope fields the engine acts on are typed here. Diff bodies
//! stay opaque [`serde_json::Value`]s owned by the rendering model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::identity::ComponentId;

/// Diff key carrying events to dispatch
pub const DIFF_EVENTS: &str = "e";
/// Diff key carrying a reply for the pushing hook
pub const DIFF_REPLY: &str = "r";
/// Diff key carrying a new document title
pub const DIFF_TITLE: &str = "t";

/// Parameters sent with a join request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinParams {
    /// Page url the view is mounted at
    pub url: Option<String>,
    /// Connect params (`_mounts`, `_track_static`, user params)
    pub params: Map<String, Value>,
    /// Signed session of the view container
    pub session: String,
    /// Static token, when the container carries one
    #[serde(rename = "static")]
    pub static_token: Option<String>,
    /// Flash payload handed over by a previous navigation
    pub flash: Option<String>,
}

/// Navigation kind for history updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NavKind {
    #[default]
    Push,
    Replace,
}

/// Full page redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub to: String,
    #[serde(default)]
    pub flash: Option<String>,
}

/// In-place url change of the current view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePatch {
    pub to: String,
    #[serde(default)]
    pub kind: NavKind,
}

/// Navigation to another live view over the same socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRedirect {
    pub to: String,
    #[serde(default)]
    pub kind: NavKind,
    #[serde(default)]
    pub flash: Option<String>,
}

/// Successful join reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinReply {
    /// Mount diff
    pub rendered: Value,
    /// Url patch to apply once joined
    #[serde(default)]
    pub live_patch: Option<LivePatch>,
}

impl JoinReply {
    /// Parse an ok payload of a join
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(payload).map_err(|e| ProtocolError::MalformedPayload {
            event: "phx_join".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Why a join did not produce a mount diff
#[derive(Debug, Clone, PartialEq)]
pub enum JoinFailure {
    /// Follow a full redirect and abandon the channel
    Redirect(Redirect),
    /// Follow a live redirect and abandon the channel
    LiveRedirect(LiveRedirect),
    /// Generic failure; reconnect with backoff
    Failed { reason: String },
}

impl JoinFailure {
    /// Classify an error payload of a join
    pub fn from_payload(payload: &Value) -> Self {
        if let Some(redirect) = payload
            .get("redirect")
            .and_then(|v| serde_json::from_value::<Redirect>(v.clone()).ok())
        {
            return JoinFailure::Redirect(redirect);
        }
        if let Some(redirect) = payload
            .get("live_redirect")
            .and_then(|v| serde_json::from_value::<LiveRedirect>(v.clone()).ok())
        {
            return JoinFailure::LiveRedirect(redirect);
        }
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        JoinFailure::Failed { reason }
    }

    /// Failure produced by a join timeout
    pub fn timeout() -> Self {
        JoinFailure::Failed {
            reason: "timeout".to_string(),
        }
    }

    /// True if the failure is a navigation instruction
    pub fn is_redirect(&self) -> bool {
        !matches!(self, JoinFailure::Failed { .. })
    }
}

/// Ok reply of an event push
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushReply {
    #[serde(default)]
    pub diff: Option<Value>,
    #[serde(default)]
    pub redirect: Option<Redirect>,
    #[serde(default)]
    pub live_patch: Option<LivePatch>,
    #[serde(default)]
    pub live_redirect: Option<LiveRedirect>,
    #[serde(default)]
    pub link_redirect: bool,
    /// Fields specific to the pushed event (`cids`, `config`, `entries`, `error`)
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl PushReply {
    /// Parse an ok payload; unknown shapes degrade to an empty reply
    pub fn from_payload(payload: Value) -> Self {
        match payload {
            Value::Object(_) => serde_json::from_value(payload).unwrap_or_default(),
            _ => PushReply::default(),
        }
    }

    /// Component ids listed in the reply
    pub fn cids(&self) -> Option<Vec<ComponentId>> {
        let cids = self.rest.get("cids")?.as_array()?;
        Some(
            cids.iter()
                .filter_map(Value::as_u64)
                .filter_map(|c| u32::try_from(c).ok())
                .map(ComponentId)
                .collect(),
        )
    }
}

/// A diff split into the rendering-model body and its envelope fields
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEnvelope {
    pub diff: Value,
    pub events: Vec<(String, Value)>,
    pub reply: Option<Value>,
    pub title: Option<String>,
}

impl DiffEnvelope {
    /// Pull the envelope keys out of a raw diff
    pub fn extract(raw: Value) -> Self {
        let mut map = match raw {
            Value::Object(map) => map,
            other => {
                return Self {
                    diff: other,
                    events: Vec::new(),
                    reply: None,
                    title: None,
                };
            }
        };

        let events = map
            .remove(DIFF_EVENTS)
            .and_then(|v| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| match item {
                Value::Array(mut pair) if pair.len() == 2 => {
                    let payload = pair.pop()?;
                    let name = pair.pop()?.as_str()?.to_string();
                    Some((name, payload))
                }
                _ => None,
            })
            .collect();
        let reply = map.remove(DIFF_REPLY);
        let title = map
            .remove(DIFF_TITLE)
            .and_then(|t| t.as_str().map(str::to_string));

        Self {
            diff: Value::Object(map),
            events,
            reply,
            title,
        }
    }

    /// True if the body carries no changes
    pub fn is_empty(&self) -> bool {
        match &self.diff {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }
}

/// Payload of an `event` push
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<ComponentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads: Option<Value>,
}

impl EventPayload {
    /// Serialize for the channel
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Server-initiated message on a view channel
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Diff(Value),
    Redirect(Redirect),
    LivePatch(LivePatch),
    LiveRedirect(LiveRedirect),
}

impl ServerMessage {
    /// Decode a channel message by event name
    pub fn parse(event: &str, payload: Value) -> Result<Self, ProtocolError> {
        let malformed = |e: serde_json::Error| ProtocolError::MalformedPayload {
            event: event.to_string(),
            reason: e.to_string(),
        };
        match event {
            "diff" => Ok(ServerMessage::Diff(payload)),
            "redirect" => serde_json::from_value(payload)
                .map(ServerMessage::Redirect)
                .map_err(malformed),
            "live_patch" => serde_json::from_value(payload)
                .map(ServerMessage::LivePatch)
                .map_err(malformed),
            "live_redirect" => serde_json::from_value(payload)
                .map(ServerMessage::LiveRedirect)
                .map_err(malformed),
            other => Err(ProtocolError::UnknownMessage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_envelope_extract() {
        let raw = json!({
            "0": "hello",
            "e": [["highlight", {"id": 1}], "bogus"],
            "r": {"ok": true},
            "t": "Inbox (3)"
        });
        let envelope = DiffEnvelope::extract(raw);
        assert_eq!(envelope.diff, json!({"0": "hello"}));
        assert_eq!(envelope.events, vec![("highlight".to_string(), json!({"id": 1}))]);
        assert_eq!(envelope.reply, Some(json!({"ok": true})));
        assert_eq!(envelope.title.as_deref(), Some("Inbox (3)"));
        assert!(!envelope.is_empty());
    }

    #[test]
    fn test_diff_envelope_empty_body() {
        let envelope = DiffEnvelope::extract(json!({"t": "x"}));
        assert!(envelope.is_empty());
    }

    #[test]
    fn test_join_failure_classification() {
        let redirect = JoinFailure::from_payload(&json!({"redirect": {"to": "/login"}}));
        assert_eq!(
            redirect,
            JoinFailure::Redirect(Redirect {
                to: "/login".to_string(),
                flash: None
            })
        );
        assert!(redirect.is_redirect());

        let live = JoinFailure::from_payload(&json!({"live_redirect": {"to": "/a", "kind": "replace"}}));
        assert!(matches!(live, JoinFailure::LiveRedirect(LiveRedirect { kind: NavKind::Replace, .. })));

        let failed = JoinFailure::from_payload(&json!({"reason": "stale"}));
        assert_eq!(failed, JoinFailure::Failed { reason: "stale".to_string() });
        assert!(!failed.is_redirect());
    }

    #[test]
    fn test_push_reply_extra_fields() {
        let reply = PushReply::from_payload(json!({"cids": [1, 4], "diff": {"0": "x"}}));
        assert_eq!(reply.cids(), Some(vec![ComponentId(1), ComponentId(4)]));
        assert!(reply.diff.is_some());

        let empty = PushReply::from_payload(json!(null));
        assert!(empty.diff.is_none());
        assert!(empty.cids().is_none());
    }

    #[test]
    fn test_event_payload_omits_missing_cid() {
        let payload = EventPayload {
            kind: "click".to_string(),
            event: "inc".to_string(),
            value: json!({"value": "1"}),
            cid: None,
            uploads: None,
        };
        let value = payload.to_value();
        assert!(value.get("cid").is_none());
        assert_eq!(value["type"], "click");

        let targeted = EventPayload { cid: Some(ComponentId(3)), ..payload };
        assert_eq!(targeted.to_value()["cid"], 3);
    }

    #[test]
    fn test_server_message_parse() {
        let msg = ServerMessage::parse("live_patch", json!({"to": "/x"})).unwrap();
        assert_eq!(
            msg,
            ServerMessage::LivePatch(LivePatch {
                to: "/x".to_string(),
                kind: NavKind::Push
            })
        );
        assert!(ServerMessage::parse("presence", json!({})).is_err());
        assert!(ServerMessage::parse("redirect", json!({"nope": 1})).is_err());
    }
}
