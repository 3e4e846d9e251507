//! Arena of view nodes
//!
//! Nodes are owned by the tree and addressed by id. Parent and child links
//! are ids, and every non-root node is listed exactly once under its parent.
//! Each root also owns the queue of join patches waiting for its subtree.

use std::collections::HashMap;

use livelink_core::{LivePatch, Markup, ViewId};
use serde_json::Value;

use crate::view::ViewNode;

/// The markup and envelope of a completed join, ready to be applied
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JoinPatch {
    pub markup: Markup,
    pub events: Vec<(String, Value)>,
    pub live_patch: Option<LivePatch>,
}

/// A join patch queued at the root until its subtree has joined
#[derive(Debug)]
pub(crate) struct PendingJoinOp {
    pub view: ViewId,
    /// Insert serial of the node that queued the patch
    pub serial: Option<u64>,
    pub patch: JoinPatch,
}

/// All live view nodes
#[derive(Debug, Default)]
pub struct ViewTree {
    nodes: HashMap<ViewId, ViewNode>,
    children: HashMap<ViewId, Vec<ViewId>>,
    roots: Vec<ViewId>,
    pending: HashMap<ViewId, Vec<PendingJoinOp>>,
    serials: HashMap<ViewId, u64>,
    next_serial: u64,
}

impl ViewTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node under its parent; returns false if the id is taken or
    /// the parent is unknown
    pub(crate) fn insert(&mut self, node: ViewNode) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        match &node.parent {
            Some(parent) => {
                if !self.nodes.contains_key(parent) {
                    return false;
                }
                self.children.entry(parent.clone()).or_default().push(node.id.clone());
            }
            None => self.roots.push(node.id.clone()),
        }
        self.serials.insert(node.id.clone(), self.next_serial);
        self.next_serial += 1;
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Detach a node; its children must have been removed first
    pub(crate) fn remove(&mut self, id: &ViewId) -> Option<ViewNode> {
        let node = self.nodes.remove(id)?;
        self.serials.remove(id);
        match &node.parent {
            Some(parent) => {
                if let Some(siblings) = self.children.get_mut(parent) {
                    siblings.retain(|c| c != id);
                }
            }
            None => {
                self.roots.retain(|r| r != id);
                self.pending.remove(id);
            }
        }
        self.children.remove(id);
        Some(node)
    }

    pub fn get(&self, id: &ViewId) -> Option<&ViewNode> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ViewId) -> Option<&mut ViewNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &ViewId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node bound to a channel topic
    pub fn by_topic(&self, topic: &str) -> Option<ViewId> {
        ViewId::from_topic(topic).filter(|id| self.nodes.contains_key(id))
    }

    pub fn roots(&self) -> &[ViewId] {
        &self.roots
    }

    /// Direct children in insertion order
    pub fn children_of(&self, id: &ViewId) -> Vec<ViewId> {
        self.children.get(id).cloned().unwrap_or_default()
    }

    pub fn has_child(&self, parent: &ViewId, child: &ViewId) -> bool {
        self.children.get(parent).is_some_and(|c| c.contains(child))
    }

    /// Every node id, sorted
    pub fn ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn queue_join_op(&mut self, root: &ViewId, view: ViewId, patch: JoinPatch) {
        let serial = self.serials.get(&view).copied();
        self.pending
            .entry(root.clone())
            .or_default()
            .push(PendingJoinOp { view, serial, patch });
    }

    /// Take the queued join patches of `root` in enqueue order
    pub(crate) fn take_join_ops(&mut self, root: &ViewId) -> Vec<PendingJoinOp> {
        self.pending.remove(root).unwrap_or_default()
    }

    /// True if the node that queued `op` is still live under its id
    pub(crate) fn is_current(&self, op: &PendingJoinOp) -> bool {
        op.serial.is_some() && self.serials.get(&op.view).copied() == op.serial
    }

    /// Drop the queued join patches of `view`
    pub(crate) fn discard_join_ops(&mut self, root: &ViewId, view: &ViewId) {
        if let Some(ops) = self.pending.get_mut(root) {
            ops.retain(|op| &op.view != view);
        }
    }

    /// Views with a join patch queued at `root`, in enqueue order
    pub fn pending_join_ops(&self, root: &ViewId) -> Vec<ViewId> {
        self.pending
            .get(root)
            .map(|ops| ops.iter().map(|op| op.view.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_core::{MockChannelHub, ViewMarker};

    fn node(hub: &MockChannelHub, id: &str, parent: Option<&str>) -> ViewNode {
        let id = ViewId::new(id);
        let marker = ViewMarker {
            id: id.clone(),
            view: None,
            session: "s".to_string(),
            static_token: None,
        };
        let parent = parent.map(ViewId::new);
        let root = parent.clone().unwrap_or_else(|| id.clone());
        ViewNode::new(marker, parent, root, None, hub.factory().channel(&id.topic()))
    }

    fn patch() -> JoinPatch {
        JoinPatch {
            markup: Markup::default(),
            events: Vec::new(),
            live_patch: None,
        }
    }

    #[test]
    fn test_insert_requires_known_parent() {
        let hub = MockChannelHub::new();
        let mut tree = ViewTree::new();

        assert!(!tree.insert(node(&hub, "child", Some("root"))));
        assert!(tree.insert(node(&hub, "root", None)));
        assert!(!tree.insert(node(&hub, "root", None)));
        assert!(tree.insert(node(&hub, "child", Some("root"))));

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.roots(), &[ViewId::new("root")]);
        assert!(tree.has_child(&ViewId::new("root"), &ViewId::new("child")));
        assert_eq!(tree.by_topic("lv:child"), Some(ViewId::new("child")));
        assert_eq!(tree.by_topic("lv:other"), None);
    }

    #[test]
    fn test_remove_unlinks_from_parent() {
        let hub = MockChannelHub::new();
        let mut tree = ViewTree::new();
        tree.insert(node(&hub, "root", None));
        tree.insert(node(&hub, "a", Some("root")));
        tree.insert(node(&hub, "b", Some("root")));

        assert!(tree.remove(&ViewId::new("a")).is_some());
        assert_eq!(tree.children_of(&ViewId::new("root")), vec![ViewId::new("b")]);
        assert!(tree.remove(&ViewId::new("a")).is_none());
    }

    #[test]
    fn test_join_ops_keep_order() {
        let hub = MockChannelHub::new();
        let mut tree = ViewTree::new();
        let root = ViewId::new("root");
        tree.insert(node(&hub, "root", None));

        tree.queue_join_op(&root, ViewId::new("b"), patch());
        tree.queue_join_op(&root, ViewId::new("a"), patch());
        tree.queue_join_op(&root, ViewId::new("c"), patch());
        tree.discard_join_ops(&root, &ViewId::new("a"));
        assert_eq!(tree.pending_join_ops(&root), vec![ViewId::new("b"), ViewId::new("c")]);

        let taken: Vec<ViewId> = tree.take_join_ops(&root).into_iter().map(|op| op.view).collect();
        assert_eq!(taken, vec![ViewId::new("b"), ViewId::new("c")]);
        assert!(tree.pending_join_ops(&root).is_empty());
    }

    #[test]
    fn test_removing_root_drops_its_queue() {
        let hub = MockChannelHub::new();
        let mut tree = ViewTree::new();
        let root = ViewId::new("root");
        tree.insert(node(&hub, "root", None));
        tree.queue_join_op(&root, ViewId::new("child"), patch());

        tree.remove(&root);
        assert!(tree.pending_join_ops(&root).is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_recreated_view_does_not_inherit_join_op() {
        let hub = MockChannelHub::new();
        let mut tree = ViewTree::new();
        let root = ViewId::new("root");
        let child = ViewId::new("child");
        tree.insert(node(&hub, "root", None));
        tree.insert(node(&hub, "child", Some("root")));
        tree.queue_join_op(&root, child.clone(), patch());
        tree.queue_join_op(&root, root.clone(), patch());

        tree.remove(&child);
        tree.insert(node(&hub, "child", Some("root")));

        let ops = tree.take_join_ops(&root);
        assert_eq!(ops.len(), 2);
        assert!(!tree.is_current(&ops[0]));
        assert!(tree.is_current(&ops[1]));
    }
}
