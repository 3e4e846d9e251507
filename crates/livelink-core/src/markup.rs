//! Structured markup fragments
//!
//! The rendering model materializes a view as a [`Markup`] fragment: the
//! children of the view's container. The engine walks fragments to find
//! nested view markers and recoverable forms before anything touches the live
//! document; the reconciler applies them against it.

use serde::{Deserialize, Serialize};

use crate::constants::{PHX_COMPONENT, PHX_PARENT_ID, PHX_SESSION, PHX_STATIC, PHX_VIEW};
use crate::identity::{ComponentId, ViewId};

/// A node of a markup fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(String),
}

impl MarkupNode {
    /// Get the element, if this node is one
    pub fn as_element(&self) -> Option<&MarkupElement> {
        match self {
            MarkupNode::Element(el) => Some(el),
            MarkupNode::Text(_) => None,
        }
    }
}

impl From<MarkupElement> for MarkupNode {
    fn from(el: MarkupElement) -> Self {
        MarkupNode::Element(el)
    }
}

/// An element with ordered attributes and children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupElement {
    /// Lower-case tag name
    pub tag: String,
    /// Attributes in source order
    pub attrs: Vec<(String, String)>,
    /// Child nodes
    pub children: Vec<MarkupNode>,
}

impl MarkupElement {
    /// Create an element without attributes or children
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: set an attribute
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder: append a child element
    pub fn with_child(mut self, child: MarkupElement) -> Self {
        self.children.push(MarkupNode::Element(child));
        self
    }

    /// Builder: append a text node
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(MarkupNode::Text(text.into()));
        self
    }

    /// Set or replace an attribute
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name, value)),
        }
    }

    /// Look up an attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Check for an attribute
    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// The element's id attribute
    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    /// Component id, if this element is a component container
    pub fn component_id(&self) -> Option<ComponentId> {
        self.attr(PHX_COMPONENT).and_then(ComponentId::parse)
    }

    /// True if this element marks a nested live view
    pub fn is_view_marker(&self) -> bool {
        self.has_attr(PHX_SESSION)
    }

    /// Concatenated text content
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Depth-first iterator over this element and all descendant elements
    pub fn elements(&self) -> Elements<'_> {
        Elements { stack: vec![self] }
    }
}

fn collect_text(nodes: &[MarkupNode], out: &mut String) {
    for node in nodes {
        match node {
            MarkupNode::Text(text) => out.push_str(text),
            MarkupNode::Element(el) => collect_text(&el.children, out),
        }
    }
}

/// Depth-first element iterator
pub struct Elements<'a> {
    stack: Vec<&'a MarkupElement>,
}

impl<'a> Iterator for Elements<'a> {
    type Item = &'a MarkupElement;

    fn next(&mut self) -> Option<Self::Item> {
        let el = self.stack.pop()?;
        for child in el.children.iter().rev() {
            if let MarkupNode::Element(child) = child {
                self.stack.push(child);
            }
        }
        Some(el)
    }
}

/// A nested view marker found in rendered markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMarker {
    /// Id of the nested view container
    pub id: ViewId,
    /// View type name
    pub view: Option<String>,
    /// Signed session
    pub session: String,
    /// Static token, if rendered
    pub static_token: Option<String>,
}

impl ViewMarker {
    /// Build a marker from a container element, if it is one
    pub fn from_element(el: &MarkupElement) -> Option<Self> {
        let id = el.id()?;
        let session = el.attr(PHX_SESSION)?;
        Some(Self {
            id: ViewId::new(id),
            view: el.attr(PHX_VIEW).map(str::to_string),
            session: session.to_string(),
            static_token: el.attr(PHX_STATIC).filter(|s| !s.is_empty()).map(str::to_string),
        })
    }
}

/// A materialized fragment: the children of a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markup {
    pub nodes: Vec<MarkupNode>,
}

impl Markup {
    /// Create a fragment from nodes
    pub fn new(nodes: Vec<MarkupNode>) -> Self {
        Self { nodes }
    }

    /// Create a fragment from top-level elements
    pub fn from_elements(elements: impl IntoIterator<Item = MarkupElement>) -> Self {
        Self {
            nodes: elements.into_iter().map(MarkupNode::Element).collect(),
        }
    }

    /// True if the fragment has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first iterator over every element of the fragment
    pub fn elements(&self) -> impl Iterator<Item = &MarkupElement> {
        self.nodes
            .iter()
            .filter_map(MarkupNode::as_element)
            .flat_map(MarkupElement::elements)
    }

    /// Nested view markers whose parent is `parent`, in document order
    ///
    /// Markers rendered with an empty session belong to destroyed views and
    /// are skipped.
    pub fn view_markers(&self, parent: &ViewId) -> Vec<ViewMarker> {
        self.elements()
            .filter(|el| el.attr(PHX_PARENT_ID) == Some(parent.as_str()))
            .filter(|el| el.attr(PHX_SESSION).is_some_and(|s| !s.is_empty()))
            .filter_map(ViewMarker::from_element)
            .collect()
    }

    /// True if a `<form>` with `binding=value` is rendered
    pub fn has_form_with(&self, binding: &str, value: &str) -> bool {
        self.elements()
            .any(|el| el.tag == "form" && el.attr(binding) == Some(value))
    }

    /// Component ids rendered anywhere in the fragment
    pub fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.elements().filter_map(MarkupElement::component_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_view(id: &str, parent: &str) -> MarkupElement {
        MarkupElement::new("div")
            .with_attr("id", id)
            .with_attr(PHX_SESSION, format!("session-{}", id))
            .with_attr(PHX_PARENT_ID, parent)
    }

    #[test]
    fn test_elements_depth_first_order() {
        let el = MarkupElement::new("div")
            .with_attr("id", "a")
            .with_child(MarkupElement::new("span").with_attr("id", "b").with_child(MarkupElement::new("i").with_attr("id", "c")))
            .with_child(MarkupElement::new("p").with_attr("id", "d"));

        let ids: Vec<_> = el.elements().filter_map(|e| e.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_view_markers_filtered_by_parent() {
        let markup = Markup::from_elements([
            child_view("c1", "root"),
            MarkupElement::new("section").with_child(child_view("c2", "root")),
            child_view("other", "c1"),
            MarkupElement::new("div")
                .with_attr("id", "gone")
                .with_attr(PHX_SESSION, "")
                .with_attr(PHX_PARENT_ID, "root"),
        ]);

        let markers = markup.view_markers(&ViewId::new("root"));
        let ids: Vec<_> = markers.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(markers[0].session, "session-c1");
    }

    #[test]
    fn test_has_form_with() {
        let markup = Markup::from_elements([MarkupElement::new("form").with_attr("phx-change", "validate")]);
        assert!(markup.has_form_with("phx-change", "validate"));
        assert!(!markup.has_form_with("phx-change", "save"));
    }

    #[test]
    fn test_component_ids_deduplicated() {
        let markup = Markup::from_elements([
            MarkupElement::new("div").with_attr(PHX_COMPONENT, "2"),
            MarkupElement::new("div")
                .with_attr(PHX_COMPONENT, "1")
                .with_child(MarkupElement::new("b").with_attr(PHX_COMPONENT, "2")),
        ]);
        assert_eq!(markup.component_ids(), vec![ComponentId(1), ComponentId(2)]);
    }

    #[test]
    fn test_text_content() {
        let el = MarkupElement::new("button")
            .with_text("Save ")
            .with_child(MarkupElement::new("b").with_text("now"));
        assert_eq!(el.text(), "Save now");
    }
}
