//! Markup-backed rendering model for testing
//!
//! Diffs carry whole fragments instead of a real diff encoding:
//!
//! ```json
//! { "html": <Markup>, "c": { "<cid>": <Markup> } }
//! ```
//!
//! `html` replaces the view's fragment; each `c` entry replaces the contents
//! of one component. Component containers (`data-phx-component="<cid>"`) in
//! the fragment are filled with their component's contents on render.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::constants::PHX_SKIP;
use crate::identity::{ComponentId, ViewId};
use crate::markup::{Markup, MarkupNode};
use crate::traits::{Rendered, RenderedFactory};

const HTML: &str = "html";
const COMPONENTS: &str = "c";
const MAX_NESTING: usize = 16;

/// Build a diff replacing the view fragment and/or component contents
pub fn markup_diff(html: Option<&Markup>, components: &[(ComponentId, &Markup)]) -> Value {
    let mut diff = Map::new();
    if let Some(html) = html {
        diff.insert(HTML.to_string(), serde_json::to_value(html).unwrap_or(Value::Null));
    }
    if !components.is_empty() {
        let entries: Map<String, Value> = components
            .iter()
            .map(|(cid, markup)| {
                (
                    cid.to_string(),
                    serde_json::to_value(markup).unwrap_or(Value::Null),
                )
            })
            .collect();
        diff.insert(COMPONENTS.to_string(), Value::Object(entries));
    }
    Value::Object(diff)
}

/// Rendering model holding whole fragments
#[derive(Debug, Clone)]
pub struct MarkupRendered {
    view: ViewId,
    html: Markup,
    components: BTreeMap<ComponentId, Markup>,
}

impl MarkupRendered {
    pub fn new(view: ViewId) -> Self {
        Self {
            view,
            html: Markup::default(),
            components: BTreeMap::new(),
        }
    }

    pub fn view(&self) -> &ViewId {
        &self.view
    }

    /// True if the model still holds state for `cid`
    pub fn has_component(&self, cid: ComponentId) -> bool {
        self.components.contains_key(&cid)
    }

    fn fill(&self, nodes: &mut [MarkupNode], only: Option<&[ComponentId]>, depth: usize) {
        if depth > MAX_NESTING {
            return;
        }
        for node in nodes.iter_mut() {
            let MarkupNode::Element(el) = node else {
                continue;
            };
            match el.component_id() {
                Some(cid) if only.is_some_and(|cids| !cids.contains(&cid)) => {
                    el.children.clear();
                    el.set_attr(PHX_SKIP, "");
                }
                Some(cid) => {
                    if let Some(contents) = self.components.get(&cid) {
                        el.children = contents.nodes.clone();
                    }
                    self.fill(&mut el.children, only, depth + 1);
                }
                None => self.fill(&mut el.children, only, depth + 1),
            }
        }
    }
}

impl Rendered for MarkupRendered {
    fn merge_diff(&mut self, diff: &Value) {
        if let Some(html) = diff
            .get(HTML)
            .and_then(|v| serde_json::from_value::<Markup>(v.clone()).ok())
        {
            self.html = html;
        }
        if let Some(components) = diff.get(COMPONENTS).and_then(Value::as_object) {
            for (key, value) in components {
                let (Some(cid), Ok(markup)) = (
                    ComponentId::parse(key),
                    serde_json::from_value::<Markup>(value.clone()),
                ) else {
                    continue;
                };
                self.components.insert(cid, markup);
            }
        }
    }

    fn to_markup(&self, only_cids: Option<&[ComponentId]>) -> Markup {
        let mut markup = self.html.clone();
        self.fill(&mut markup.nodes, only_cids, 0);
        markup
    }

    fn component_to_markup(&self, cid: ComponentId) -> Markup {
        let mut markup = self.components.get(&cid).cloned().unwrap_or_default();
        self.fill(&mut markup.nodes, None, 0);
        markup
    }

    fn component_ids(&self, diff: &Value) -> Vec<ComponentId> {
        diff.get(COMPONENTS)
            .and_then(Value::as_object)
            .map(|components| components.keys().filter_map(|k| ComponentId::parse(k)).collect())
            .unwrap_or_default()
    }

    fn is_component_only_diff(&self, diff: &Value) -> bool {
        diff.get(COMPONENTS).is_some() && diff.get(HTML).is_none()
    }

    fn prune_ids(&mut self, cids: &[ComponentId]) {
        for cid in cids {
            self.components.remove(cid);
        }
    }
}

/// Factory for [`MarkupRendered`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupRenderedFactory;

impl RenderedFactory for MarkupRenderedFactory {
    fn build(&self, view: &ViewId, diff: &Value) -> Box<dyn Rendered> {
        let mut rendered = MarkupRendered::new(view.clone());
        rendered.merge_diff(diff);
        Box::new(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PHX_COMPONENT;
    use crate::markup::MarkupElement;

    fn page() -> Markup {
        Markup::from_elements([
            MarkupElement::new("h1").with_text("Title"),
            MarkupElement::new("div").with_attr(PHX_COMPONENT, "1"),
            MarkupElement::new("div").with_attr(PHX_COMPONENT, "2"),
        ])
    }

    fn card(text: &str) -> Markup {
        Markup::from_elements([MarkupElement::new("p").with_text(text)])
    }

    #[test]
    fn test_fills_component_containers() {
        let diff = markup_diff(Some(&page()), &[(ComponentId(1), &card("one")), (ComponentId(2), &card("two"))]);
        let rendered = MarkupRenderedFactory.build(&ViewId::new("v"), &diff);

        let markup = rendered.to_markup(None);
        let texts: Vec<String> = markup.nodes.iter().filter_map(MarkupNode::as_element).map(|e| e.text()).collect();
        assert_eq!(texts, vec!["Title", "one", "two"]);
    }

    #[test]
    fn test_filter_marks_skipped_components() {
        let diff = markup_diff(Some(&page()), &[(ComponentId(1), &card("one")), (ComponentId(2), &card("two"))]);
        let rendered = MarkupRenderedFactory.build(&ViewId::new("v"), &diff);

        let markup = rendered.to_markup(Some(&[ComponentId(2)]));
        let skipped: Vec<_> = markup.elements().filter(|e| e.has_attr(PHX_SKIP)).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].component_id(), Some(ComponentId(1)));
    }

    #[test]
    fn test_component_only_diff() {
        let mut rendered = MarkupRendered::new(ViewId::new("v"));
        rendered.merge_diff(&markup_diff(Some(&page()), &[]));

        let diff = markup_diff(None, &[(ComponentId(2), &card("changed"))]);
        assert!(rendered.is_component_only_diff(&diff));
        assert_eq!(rendered.component_ids(&diff), vec![ComponentId(2)]);

        rendered.merge_diff(&diff);
        assert_eq!(rendered.component_to_markup(ComponentId(2)), card("changed"));

        rendered.prune_ids(&[ComponentId(2)]);
        assert!(!rendered.has_component(ComponentId(2)));
    }
}
