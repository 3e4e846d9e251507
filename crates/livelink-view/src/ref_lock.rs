//! Element locking for in-flight operations
//!
//! Locking an element stamps it with a [`RefToken`] and a loading class.
//! While the token is outstanding the element is frozen: patches that would
//! update it are stored here and applied when the token is released.

use std::collections::{BTreeSet, HashMap};

use livelink_core::constants::{
    PHX_DISABLED, PHX_DISABLE_WITH_RESTORE, PHX_EVENT_KINDS, PHX_READONLY, PHX_REF, loading_class,
};
use livelink_core::{Dom, Flag, MarkupElement, NodeId, RefToken};

use crate::error::LockError;

/// Per-view lock bookkeeping
#[derive(Debug, Default)]
pub struct RefLock {
    next: u64,
    outstanding: BTreeSet<RefToken>,
    deferred: HashMap<NodeId, MarkupElement>,
}

impl RefLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token currently stamped on `el`
    pub fn token_of(dom: &dyn Dom, el: NodeId) -> Option<RefToken> {
        dom.attribute(el, PHX_REF).and_then(|v| RefToken::parse(&v))
    }

    /// Elements of `elements` that carry no lock, duplicates removed
    pub fn lockable(dom: &dyn Dom, elements: &[NodeId]) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::with_capacity(elements.len());
        for el in elements {
            if !out.contains(el) && !dom.has_attribute(*el, PHX_REF) {
                out.push(*el);
            }
        }
        out
    }

    /// Lock `elements` under a fresh token
    ///
    /// Every element gets the token and the loading class of `kind`. An
    /// element declaring `disable_with` has its text saved once and replaced.
    /// An empty list still allocates a token, which correlates the reply.
    pub fn lock(
        &mut self,
        dom: &mut dyn Dom,
        elements: &[NodeId],
        kind: &str,
        disable_with: &str,
    ) -> Result<RefToken, LockError> {
        for el in elements {
            if let Some(token) = Self::token_of(dom, *el) {
                return Err(LockError::AlreadyLocked { element: *el, token });
            }
        }

        let token = RefToken(self.next);
        self.next += 1;

        let class = loading_class(kind);
        for el in elements {
            dom.add_class(*el, &class);
            dom.set_attribute(*el, PHX_REF, &token.to_attr());
            if let Some(text) = dom.attribute(*el, disable_with) {
                let saved = dom
                    .attribute(*el, PHX_DISABLE_WITH_RESTORE)
                    .is_some_and(|s| !s.is_empty());
                if !saved {
                    let current = dom.inner_text(*el);
                    dom.set_attribute(*el, PHX_DISABLE_WITH_RESTORE, &current);
                }
                dom.set_inner_text(*el, &text);
            }
        }
        self.outstanding.insert(token);
        Ok(token)
    }

    /// Save the current `flag` of `el` and switch it on
    pub fn freeze(dom: &mut dyn Dom, el: NodeId, flag: Flag) {
        let saved = match flag {
            Flag::Disabled => PHX_DISABLED,
            Flag::ReadOnly => PHX_READONLY,
            Flag::Checked => return,
        };
        let current = dom.flag(el, flag);
        dom.set_attribute(el, saved, if current { "true" } else { "false" });
        dom.set_flag(el, flag, true);
    }

    /// Release `token` on every element under `root` carrying it
    ///
    /// Saved flags and text are restored and loading classes removed. The
    /// returned snapshots are the latest patch targets deferred while the
    /// elements were locked, in document order.
    pub fn unlock(
        &mut self,
        dom: &mut dyn Dom,
        root: NodeId,
        token: RefToken,
    ) -> Vec<(NodeId, MarkupElement)> {
        self.outstanding.remove(&token);

        let mut locked = Vec::new();
        if Self::token_of(dom, root) == Some(token) {
            locked.push(root);
        }
        locked.extend(
            dom.query_attr(root, PHX_REF)
                .into_iter()
                .filter(|el| Self::token_of(dom, *el) == Some(token)),
        );

        let mut deferred = Vec::new();
        for el in locked {
            dom.remove_attribute(el, PHX_REF);

            if let Some(saved) = dom.attribute(el, PHX_READONLY) {
                dom.set_flag(el, Flag::ReadOnly, saved == "true");
                dom.remove_attribute(el, PHX_READONLY);
            }
            if let Some(saved) = dom.attribute(el, PHX_DISABLED) {
                dom.set_flag(el, Flag::Disabled, saved == "true");
                dom.remove_attribute(el, PHX_DISABLED);
            }
            for kind in PHX_EVENT_KINDS {
                dom.remove_class(el, &loading_class(kind));
            }
            if let Some(text) = dom.attribute(el, PHX_DISABLE_WITH_RESTORE) {
                dom.set_inner_text(el, &text);
                dom.remove_attribute(el, PHX_DISABLE_WITH_RESTORE);
            }

            if let Some(target) = self.deferred.remove(&el) {
                deferred.push((el, target));
            }
        }
        deferred
    }

    /// Store the latest patch target of a locked element
    pub fn defer(&mut self, el: NodeId, target: MarkupElement) {
        self.deferred.insert(el, target);
    }

    /// Drop state kept for an element that left the document
    pub fn forget(&mut self, el: NodeId) {
        self.deferred.remove(&el);
    }

    /// Strip lock markers left under `root` by a previous connection
    pub fn drop_pending(&mut self, dom: &mut dyn Dom, root: NodeId) {
        for el in dom.query_attr(root, PHX_REF) {
            dom.remove_attribute(el, PHX_REF);
        }
        self.outstanding.clear();
        self.deferred.clear();
    }

    pub fn is_outstanding(&self, token: RefToken) -> bool {
        self.outstanding.contains(&token)
    }

    pub fn outstanding(&self) -> impl Iterator<Item = RefToken> + '_ {
        self.outstanding.iter().copied()
    }

    pub fn has_deferred(&self, el: NodeId) -> bool {
        self.deferred.contains_key(&el)
    }
}
