//! Identifiers shared by the engine and its collaborators
//!
//! - [`ViewId`]: the DOM id of a live view container
//! - [`NodeId`]: a handle to an element of the live document
//! - [`ComponentId`]: a nested, independently diffable unit of a rendering model
//! - [`RefToken`]: an operation token locking elements while a push is in flight
//! - [`PushRef`]: correlation handle between a channel push and its reply

use std::fmt::Display;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Prefix of every view channel topic
pub const TOPIC_PREFIX: &str = "lv:";

/// Identity of a view node (the id attribute of its container element)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ViewId(String);

impl ViewId {
    /// Create a view id from the container's DOM id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the DOM id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel topic used by this view
    pub fn topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.0)
    }

    /// Recover a view id from a channel topic
    pub fn from_topic(topic: &str) -> Option<Self> {
        topic
            .strip_prefix(TOPIC_PREFIX)
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl From<&str> for ViewId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Handle to an element of the live document
///
/// Handles are stable for the lifetime of the element; a replaced element
/// gets a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Component identifier inside a rendering model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// Parse a component id from its attribute form
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse().ok().map(Self)
    }
}

/// Lock token for an in-flight operation, unique per view node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct RefToken(pub u64);

impl RefToken {
    /// Attribute form of the token
    pub fn to_attr(&self) -> String {
        self.0.to_string()
    }

    /// Parse a token from its attribute form
    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok().map(Self)
    }
}

/// Correlation handle for a channel push (join, event, leave)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct PushRef(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_id_topic_roundtrip() {
        let id = ViewId::new("phx-F1");
        assert_eq!(id.topic(), "lv:phx-F1");
        assert_eq!(ViewId::from_topic("lv:phx-F1"), Some(id));
        assert_eq!(ViewId::from_topic("lv:"), None);
        assert_eq!(ViewId::from_topic("phoenix"), None);
    }

    #[test]
    fn test_component_id_parse() {
        assert_eq!(ComponentId::parse("12"), Some(ComponentId(12)));
        assert_eq!(ComponentId::parse(" 3 "), Some(ComponentId(3)));
        assert_eq!(ComponentId::parse("abc"), None);
    }

    #[test]
    fn test_ref_token_attr() {
        let token = RefToken(7);
        assert_eq!(token.to_attr(), "7");
        assert_eq!(RefToken::parse("7"), Some(token));
        assert_eq!(RefToken::parse(""), None);
    }
}
