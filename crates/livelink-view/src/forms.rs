//! Form recovery, scheduled submits and form serialization

use std::collections::VecDeque;

use livelink_core::{Dom, Markup, NodeId, RefToken};

use crate::config::Bindings;

/// Value of the auto-recover binding that opts a form out of recovery
pub const AUTO_RECOVER_IGNORE: &str = "ignore";

/// Forms whose state should be replayed after a rejoin
///
/// A view that never completed a join has nothing to recover. Otherwise the
/// candidates are the change-bound forms owned by the view that have at
/// least one field, do not opt out, and are still rendered by `markup`.
pub fn forms_for_recovery(
    dom: &dyn Dom,
    owned: &[NodeId],
    join_count: u32,
    markup: &Markup,
    bindings: &Bindings,
) -> Vec<NodeId> {
    if join_count == 0 {
        return Vec::new();
    }
    owned
        .iter()
        .copied()
        .filter(|el| dom.tag_name(*el).as_deref() == Some("form"))
        .filter(|form| {
            let Some(change) = dom.attribute(*form, bindings.change()) else {
                return false;
            };
            !dom.form_elements(*form).is_empty()
                && dom.attribute(*form, bindings.auto_recover()).as_deref() != Some(AUTO_RECOVER_IGNORE)
                && markup.has_form_with(bindings.change(), &change)
        })
        .collect()
}

/// Event a recovering form replays
pub fn recovery_event(dom: &dyn Dom, form: NodeId, bindings: &Bindings) -> Option<String> {
    dom.attribute(form, bindings.auto_recover())
        .filter(|e| !e.is_empty())
        .or_else(|| dom.attribute(form, bindings.change()))
}

/// Forms still to replay before a join can complete, one at a time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecoveryQueue {
    forms: VecDeque<NodeId>,
}

impl RecoveryQueue {
    pub fn new(forms: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            forms: forms.into_iter().collect(),
        }
    }

    pub fn next(&mut self) -> Option<NodeId> {
        self.forms.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }
}

/// A submit waiting for in-flight uploads of its form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledSubmit {
    pub form: NodeId,
    pub token: RefToken,
    pub event: String,
}

/// Submits waiting for uploads, at most one per form
#[derive(Debug, Default)]
pub struct SubmitQueue {
    scheduled: Vec<ScheduledSubmit>,
}

impl SubmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scheduled(&self, form: NodeId) -> bool {
        self.scheduled.iter().any(|s| s.form == form)
    }

    /// Schedule a submit; returns false if the form already has one
    pub fn schedule(&mut self, submit: ScheduledSubmit) -> bool {
        if self.is_scheduled(submit.form) {
            return false;
        }
        self.scheduled.push(submit);
        true
    }

    /// Remove and return the submit scheduled for `form`
    pub fn take(&mut self, form: NodeId) -> Option<ScheduledSubmit> {
        let index = self.scheduled.iter().position(|s| s.form == form)?;
        Some(self.scheduled.remove(index))
    }

    /// Remove every scheduled submit
    pub fn drain(&mut self) -> Vec<ScheduledSubmit> {
        std::mem::take(&mut self.scheduled)
    }
}

/// URL-encode form pairs followed by `extra` pairs
pub fn serialize_form(pairs: &[(String, String)], extra: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(extra.iter().copied())
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// Form encoding writes spaces as '+'
fn encode_component(raw: &str) -> String {
    urlencoding::encode(raw).replace("%20", "+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_core::{MarkupElement, MemoryDom};

    fn form(id: &str, change: &str) -> MarkupElement {
        MarkupElement::new("form")
            .with_attr("id", id)
            .with_attr("phx-change", change)
            .with_child(MarkupElement::new("input").with_attr("name", "q").with_attr("value", "x"))
    }

    fn setup(forms: Vec<MarkupElement>) -> (MemoryDom, Vec<NodeId>, Markup) {
        let markup = Markup::from_elements(forms);
        let dom = MemoryDom::from_markup(&markup);
        let owned = dom.descendants(dom.body());
        (dom, owned, markup)
    }

    #[test]
    fn test_first_join_recovers_nothing() {
        let (dom, owned, markup) = setup(vec![form("a", "validate")]);
        assert!(forms_for_recovery(&dom, &owned, 0, &markup, &Bindings::default()).is_empty());
    }

    #[test]
    fn test_recovery_candidates() {
        let ignored = form("b", "other").with_attr("phx-auto-recover", "ignore");
        let empty = MarkupElement::new("form").with_attr("id", "c").with_attr("phx-change", "noop");
        let (dom, owned, _) = setup(vec![form("a", "validate"), ignored, empty, form("d", "gone")]);
        let rendered = Markup::from_elements([form("a", "validate"), form("b", "other")]);

        let forms = forms_for_recovery(&dom, &owned, 1, &rendered, &Bindings::default());
        assert_eq!(forms, vec![dom.element_by_id("a").unwrap()]);
    }

    #[test]
    fn test_recovery_event_prefers_auto_recover() {
        let (dom, _, _) = setup(vec![form("a", "validate").with_attr("phx-auto-recover", "recover")]);
        let el = dom.element_by_id("a").unwrap();
        assert_eq!(recovery_event(&dom, el, &Bindings::default()).as_deref(), Some("recover"));
    }

    #[test]
    fn test_submit_queue_one_per_form() {
        let mut queue = SubmitQueue::new();
        let submit = ScheduledSubmit {
            form: NodeId(3),
            token: RefToken(1),
            event: "save".to_string(),
        };
        assert!(queue.schedule(submit.clone()));
        assert!(!queue.schedule(ScheduledSubmit {
            token: RefToken(2),
            ..submit.clone()
        }));
        assert_eq!(queue.take(NodeId(3)), Some(submit));
        assert_eq!(queue.take(NodeId(3)), None);
    }

    #[test]
    fn test_serialize_form() {
        let pairs = vec![
            ("user[name]".to_string(), "Ada L".to_string()),
            ("agree".to_string(), "on".to_string()),
        ];
        assert_eq!(
            serialize_form(&pairs, &[("_target", "user[name]")]),
            "user%5Bname%5D=Ada+L&agree=on&_target=user%5Bname%5D"
        );
    }
}
