//! Two-phase component pruning
//!
//! Components discarded by a patch are first announced to the server as
//! candidates. When the server acknowledges, the candidates still absent
//! from the document are confirmed and dropped from the rendering model.
//! A component that reappeared in between is never confirmed.

use std::collections::BTreeSet;

use livelink_core::ComponentId;

/// Pruning state of one view
#[derive(Debug, Default)]
pub struct ComponentPruner {
    pending: BTreeSet<ComponentId>,
}

impl ComponentPruner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a batch from the ids discarded by a patch
    ///
    /// Returns the ids to announce, or `None` if every discarded component is
    /// still present somewhere in the view.
    pub fn begin(
        &mut self,
        discarded: &[ComponentId],
        is_present: impl Fn(ComponentId) -> bool,
    ) -> Option<Vec<ComponentId>> {
        let mut batch: Vec<ComponentId> = discarded
            .iter()
            .copied()
            .filter(|cid| !is_present(*cid))
            .collect();
        batch.sort();
        batch.dedup();
        if batch.is_empty() {
            return None;
        }
        self.pending.extend(batch.iter().copied());
        Some(batch)
    }

    /// Settle an acknowledged batch
    ///
    /// Every id of the batch leaves the pending set. Returns the ids still
    /// absent, which may be confirmed as destroyed.
    pub fn settle(&mut self, batch: &[ComponentId], is_present: impl Fn(ComponentId) -> bool) -> Vec<ComponentId> {
        for cid in batch {
            self.pending.remove(cid);
        }
        batch.iter().copied().filter(|cid| !is_present(*cid)).collect()
    }

    /// Ids announced but not yet settled
    pub fn pending(&self) -> Vec<ComponentId> {
        self.pending.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_components_are_not_candidates() {
        let mut pruner = ComponentPruner::new();
        let batch = pruner.begin(&[ComponentId(1), ComponentId(2)], |cid| cid == ComponentId(1));
        assert_eq!(batch, Some(vec![ComponentId(2)]));
        assert_eq!(pruner.pending(), vec![ComponentId(2)]);

        assert_eq!(pruner.begin(&[ComponentId(1)], |_| true), None);
    }

    #[test]
    fn test_reappeared_component_is_not_confirmed() {
        let mut pruner = ComponentPruner::new();
        let batch = pruner.begin(&[ComponentId(3), ComponentId(4)], |_| false).unwrap();

        let confirmed = pruner.settle(&batch, |cid| cid == ComponentId(3));
        assert_eq!(confirmed, vec![ComponentId(4)]);
        assert!(pruner.pending().is_empty());
    }

    #[test]
    fn test_discarded_duplicates_collapse() {
        let mut pruner = ComponentPruner::new();
        let batch = pruner.begin(&[ComponentId(5), ComponentId(5)], |_| false).unwrap();
        assert_eq!(batch, vec![ComponentId(5)]);
    }
}
