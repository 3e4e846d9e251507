//! In-memory document for testing
//!
//! An arena of element and text nodes with a small keyed reconciler:
//!
//! - children are matched by id, or by tag among id-less siblings
//! - unmatched targets are built and reported as added (with descendants)
//! - unmatched existing elements are reported as discarded, then dropped
//! - nested view containers only merge attributes; their contents belong
//!   to the nested view, and a live session is never overwritten
//! - elements marked `phx-update="ignore"` only merge `data-*` attributes
//! - skip markers (`data-phx-skip`) leave the existing element untouched
//!
//! Runtime state that is not an attribute (selected files, focus) survives a
//! patch as long as the element is matched.

use std::collections::{HashMap, HashSet};

use crate::constants::{PHX_SESSION, PHX_SKIP};
use crate::dom::{Dom, FileInfo, PatchObserver, PatchOutcome, UpdateDecision};
use crate::error::DomError;
use crate::identity::NodeId;
use crate::markup::{Markup, MarkupElement, MarkupNode};

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        files: Vec<FileInfo>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed document
#[derive(Debug, Clone)]
pub struct MemoryDom {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    body: NodeId,
    visible: bool,
    active: Option<NodeId>,
    update_attr: String,
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDom {
    /// Create an empty document with a `<body>`
    pub fn new() -> Self {
        let body = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            body,
            Node {
                kind: NodeKind::Element {
                    tag: "body".to_string(),
                    attrs: Vec::new(),
                    files: Vec::new(),
                },
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            nodes,
            next_id: 1,
            body,
            visible: true,
            active: None,
            update_attr: "phx-update".to_string(),
        }
    }

    /// Create a document whose body holds `markup`
    pub fn from_markup(markup: &Markup) -> Self {
        let mut dom = Self::new();
        let body = dom.body;
        for node in &markup.nodes {
            let id = dom.build(body, node);
            dom.push_child(body, id);
        }
        dom
    }

    /// Use a different `phx-update` attribute name
    pub fn with_update_attr(mut self, name: impl Into<String>) -> Self {
        self.update_attr = name.into();
        self
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Append an element subtree under `parent` without any callbacks
    pub fn append(&mut self, parent: NodeId, el: &MarkupElement) -> NodeId {
        let id = self.build(parent, &MarkupNode::Element(el.clone()));
        self.push_child(parent, id);
        id
    }

    /// Detach an element subtree without any callbacks
    pub fn remove(&mut self, el: NodeId) {
        let parent = self.nodes.get(&el).and_then(|n| n.parent);
        if let Some(node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            node.children.retain(|c| *c != el);
        }
        self.drop_subtree(el);
    }

    /// Select files in a file input
    pub fn set_files(&mut self, el: NodeId, selected: Vec<FileInfo>) {
        if let Some(Node {
            kind: NodeKind::Element { files, .. },
            ..
        }) = self.nodes.get_mut(&el)
        {
            *files = selected;
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn focus(&mut self, el: NodeId) {
        self.active = Some(el);
    }

    /// True if `el` is still part of the document
    pub fn is_attached(&self, el: NodeId) -> bool {
        self.nodes.contains_key(&el) && self.contains(self.body, el)
    }

    /// Rebuild the markup of an element, for assertions
    pub fn snapshot(&self, el: NodeId) -> Option<MarkupElement> {
        let node = self.nodes.get(&el)?;
        let NodeKind::Element { tag, attrs, .. } = &node.kind else {
            return None;
        };
        let children = node
            .children
            .iter()
            .filter_map(|child| match &self.nodes.get(child)?.kind {
                NodeKind::Text(text) => Some(MarkupNode::Text(text.clone())),
                NodeKind::Element { .. } => self.snapshot(*child).map(MarkupNode::Element),
            })
            .collect();
        Some(MarkupElement {
            tag: tag.clone(),
            attrs: attrs.clone(),
            children,
        })
    }

    fn alloc(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        id
    }

    fn push_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
    }

    fn build(&mut self, parent: NodeId, node: &MarkupNode) -> NodeId {
        match node {
            MarkupNode::Text(text) => self.alloc(NodeKind::Text(text.clone()), parent),
            MarkupNode::Element(el) => {
                let id = self.alloc(
                    NodeKind::Element {
                        tag: el.tag.clone(),
                        attrs: el.attrs.clone(),
                        files: Vec::new(),
                    },
                    parent,
                );
                for child in &el.children {
                    let child_id = self.build(id, child);
                    self.push_child(id, child_id);
                }
                id
            }
        }
    }

    fn drop_subtree(&mut self, el: NodeId) {
        let Some(node) = self.nodes.remove(&el) else {
            return;
        };
        if self.active == Some(el) {
            self.active = None;
        }
        for child in node.children {
            self.drop_subtree(child);
        }
    }

    fn is_text(&self, el: NodeId) -> bool {
        matches!(self.nodes.get(&el).map(|n| &n.kind), Some(NodeKind::Text(_)))
    }

    fn find_match(
        &self,
        existing: &[NodeId],
        used: &HashSet<NodeId>,
        target: &MarkupElement,
    ) -> Option<NodeId> {
        existing.iter().copied().filter(|n| !used.contains(n)).find(|n| {
            if self.tag_name(*n).as_deref() != Some(target.tag.as_str()) {
                return false;
            }
            let id = self.attribute(*n, "id").filter(|id| !id.is_empty());
            match target.id() {
                Some(target_id) => id.as_deref() == Some(target_id),
                None => id.is_none(),
            }
        })
    }

    fn discard(&mut self, el: NodeId, observer: &mut dyn PatchObserver) {
        if !self.is_text(el) {
            let mut subtree = vec![el];
            subtree.extend(self.descendants(el));
            for node in subtree {
                observer.discarded(&*self, node);
            }
        }
        self.drop_subtree(el);
    }

    fn patch_children(
        &mut self,
        parent: NodeId,
        targets: &[MarkupNode],
        observer: &mut dyn PatchObserver,
    ) -> bool {
        let existing = self
            .nodes
            .get(&parent)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        let mut used = HashSet::new();
        let mut next_children = Vec::with_capacity(targets.len());
        let mut added = Vec::new();
        let mut child_views_added = false;

        for target in targets {
            match target {
                MarkupNode::Text(_) => {
                    next_children.push(self.build(parent, target));
                }
                MarkupNode::Element(el) => match self.find_match(&existing, &used, el) {
                    Some(node) => {
                        used.insert(node);
                        next_children.push(node);
                        child_views_added |= self.update_element(node, el, observer);
                    }
                    None => {
                        let node = self.build(parent, target);
                        next_children.push(node);
                        added.push(node);
                        if el.elements().any(MarkupElement::is_view_marker) {
                            child_views_added = true;
                        }
                    }
                },
            }
        }

        for node in existing {
            if !used.contains(&node) {
                self.discard(node, observer);
            }
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children = next_children;
        }

        for node in added {
            observer.added(&*self, node);
            for descendant in self.descendants(node) {
                observer.added(&*self, descendant);
            }
        }
        child_views_added
    }

    fn replace_attrs(&mut self, el: NodeId, next: &[(String, String)]) {
        if let Some(Node {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = self.nodes.get_mut(&el)
        {
            *attrs = next.to_vec();
        }
    }

    fn update_element(
        &mut self,
        el: NodeId,
        target: &MarkupElement,
        observer: &mut dyn PatchObserver,
    ) -> bool {
        if target.has_attr(PHX_SKIP) {
            return false;
        }
        if observer.before_update(&*self, el, target) == UpdateDecision::Defer {
            return false;
        }

        if target.is_view_marker() {
            let live = self
                .attribute(el, PHX_SESSION)
                .is_some_and(|session| !session.is_empty());
            for (name, value) in &target.attrs {
                if name != PHX_SESSION || !live {
                    self.set_attribute(el, name, value);
                }
            }
            observer.updated(&*self, el);
            return false;
        }

        if self.attribute(el, &self.update_attr).as_deref() == Some("ignore") {
            for (name, value) in target.attrs.iter().filter(|(n, _)| n.starts_with("data-")) {
                self.set_attribute(el, name, value);
            }
            observer.updated(&*self, el);
            return false;
        }

        self.replace_attrs(el, &target.attrs);
        let child_views_added = self.patch_children(el, &target.children, observer);
        observer.updated(&*self, el);
        child_views_added
    }

    fn collect_text(&self, el: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&el) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }
}

impl Dom for MemoryDom {
    fn document(&self) -> NodeId {
        self.body
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.body)
            .into_iter()
            .find(|el| self.attribute(*el, "id").as_deref() == Some(id))
    }

    fn tag_name(&self, el: NodeId) -> Option<String> {
        match &self.nodes.get(&el)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    fn attribute(&self, el: NodeId, name: &str) -> Option<String> {
        match &self.nodes.get(&el)?.kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            NodeKind::Text(_) => None,
        }
    }

    fn attributes(&self, el: NodeId) -> Vec<(String, String)> {
        match self.nodes.get(&el).map(|n| &n.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs.clone(),
            _ => Vec::new(),
        }
    }

    fn set_attribute(&mut self, el: NodeId, name: &str, value: &str) {
        if let Some(Node {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = self.nodes.get_mut(&el)
        {
            match attrs.iter_mut().find(|(n, _)| n == name) {
                Some((_, v)) => *v = value.to_string(),
                None => attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    fn remove_attribute(&mut self, el: NodeId, name: &str) {
        if let Some(Node {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = self.nodes.get_mut(&el)
        {
            attrs.retain(|(n, _)| n != name);
        }
    }

    fn inner_text(&self, el: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(el, &mut out);
        out
    }

    fn set_inner_text(&mut self, el: NodeId, text: &str) {
        let Some(children) = self.nodes.get(&el).map(|n| n.children.clone()) else {
            return;
        };
        for child in children {
            self.drop_subtree(child);
        }
        let text_node = self.alloc(NodeKind::Text(text.to_string()), el);
        if let Some(node) = self.nodes.get_mut(&el) {
            node.children = vec![text_node];
        }
    }

    fn value(&self, el: NodeId) -> Option<String> {
        match self.tag_name(el)?.as_str() {
            "input" | "button" | "option" => self.attribute(el, "value"),
            "textarea" => Some(self.inner_text(el)),
            "select" => {
                let options: Vec<NodeId> = self
                    .descendants(el)
                    .into_iter()
                    .filter(|o| self.tag_name(*o).as_deref() == Some("option"))
                    .collect();
                let chosen = options
                    .iter()
                    .copied()
                    .find(|o| self.has_attribute(*o, "selected"))
                    .or_else(|| options.first().copied())?;
                self.attribute(chosen, "value")
                    .or_else(|| Some(self.inner_text(chosen)))
            }
            _ => None,
        }
    }

    fn parent(&self, el: NodeId) -> Option<NodeId> {
        self.nodes.get(&el)?.parent
    }

    fn children(&self, el: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&el)
            .map(|n| {
                n.children
                    .iter()
                    .copied()
                    .filter(|c| !self.is_text(*c))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn files(&self, el: NodeId) -> Vec<FileInfo> {
        match self.nodes.get(&el).map(|n| &n.kind) {
            Some(NodeKind::Element { files, .. }) => files.clone(),
            _ => Vec::new(),
        }
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn active_element(&self) -> Option<NodeId> {
        self.active
    }

    fn blur(&mut self, el: NodeId) {
        if self.active == Some(el) {
            self.active = None;
        }
    }

    fn patch(
        &mut self,
        container: NodeId,
        target: &Markup,
        observer: &mut dyn PatchObserver,
    ) -> Result<PatchOutcome, DomError> {
        if !self.nodes.contains_key(&container) {
            return Err(DomError::Detached(container.0));
        }
        let child_views_added = self.patch_children(container, &target.nodes, observer);
        Ok(PatchOutcome { child_views_added })
    }

    fn patch_element(
        &mut self,
        el: NodeId,
        target: &MarkupElement,
        observer: &mut dyn PatchObserver,
    ) -> Result<PatchOutcome, DomError> {
        if !self.nodes.contains_key(&el) {
            return Err(DomError::Detached(el.0));
        }
        let child_views_added = self.update_element(el, target, observer);
        Ok(PatchOutcome { child_views_added })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PHX_PARENT_ID, PHX_REF};

    #[derive(Default)]
    struct Recorder {
        added: Vec<String>,
        updated: Vec<String>,
        discarded: Vec<String>,
        deferred: Vec<(NodeId, MarkupElement)>,
    }

    fn label(dom: &dyn Dom, el: NodeId) -> String {
        dom.attribute(el, "id")
            .unwrap_or_else(|| dom.tag_name(el).unwrap_or_default())
    }

    impl PatchObserver for Recorder {
        fn added(&mut self, dom: &dyn Dom, el: NodeId) {
            self.added.push(label(dom, el));
        }

        fn before_update(&mut self, dom: &dyn Dom, el: NodeId, target: &MarkupElement) -> UpdateDecision {
            if dom.has_attribute(el, PHX_REF) {
                self.deferred.push((el, target.clone()));
                UpdateDecision::Defer
            } else {
                UpdateDecision::Apply
            }
        }

        fn updated(&mut self, dom: &dyn Dom, el: NodeId) {
            self.updated.push(label(dom, el));
        }

        fn discarded(&mut self, dom: &dyn Dom, el: NodeId) {
            self.discarded.push(label(dom, el));
        }
    }

    fn container() -> (MemoryDom, NodeId) {
        let dom = MemoryDom::from_markup(&Markup::from_elements([MarkupElement::new("div")
            .with_attr("id", "root")
            .with_child(MarkupElement::new("p").with_attr("id", "a").with_text("one"))
            .with_child(MarkupElement::new("p").with_attr("id", "b").with_text("two"))]));
        let root = dom.element_by_id("root").unwrap();
        (dom, root)
    }

    #[test]
    fn test_patch_keyed_by_id() {
        let (mut dom, root) = container();
        let a = dom.element_by_id("a").unwrap();
        let mut recorder = Recorder::default();

        let target = Markup::from_elements([
            MarkupElement::new("p").with_attr("id", "c").with_child(MarkupElement::new("i").with_attr("id", "c1")),
            MarkupElement::new("p").with_attr("id", "a").with_text("uno"),
        ]);
        let outcome = dom.patch(root, &target, &mut recorder).unwrap();

        assert!(!outcome.child_views_added);
        assert_eq!(dom.element_by_id("a"), Some(a));
        assert_eq!(dom.inner_text(a), "uno");
        assert!(dom.element_by_id("b").is_none());
        assert_eq!(recorder.added, vec!["c", "c1"]);
        assert_eq!(recorder.updated, vec!["a"]);
        assert_eq!(recorder.discarded, vec!["b"]);
        assert_eq!(dom.inner_text(root), "uno");
    }

    #[test]
    fn test_locked_element_is_deferred() {
        let (mut dom, root) = container();
        let a = dom.element_by_id("a").unwrap();
        dom.set_attribute(a, PHX_REF, "0");
        let mut recorder = Recorder::default();

        let target = Markup::from_elements([
            MarkupElement::new("p").with_attr("id", "a").with_text("server"),
            MarkupElement::new("p").with_attr("id", "b").with_text("two"),
        ]);
        dom.patch(root, &target, &mut recorder).unwrap();

        assert_eq!(dom.inner_text(a), "one");
        assert_eq!(recorder.deferred.len(), 1);
        assert_eq!(recorder.deferred[0].0, a);

        dom.remove_attribute(a, PHX_REF);
        let (el, snapshot) = recorder.deferred.pop().unwrap();
        dom.patch_element(el, &snapshot, &mut recorder).unwrap();
        assert_eq!(dom.inner_text(a), "server");
    }

    #[test]
    fn test_new_view_marker_reported() {
        let (mut dom, root) = container();
        let target = Markup::from_elements([MarkupElement::new("div")
            .with_attr("id", "child")
            .with_attr(PHX_SESSION, "abc")
            .with_attr(PHX_PARENT_ID, "root")]);
        let outcome = dom.patch(root, &target, &mut Recorder::default()).unwrap();
        assert!(outcome.child_views_added);

        let again = dom.patch(root, &target, &mut Recorder::default()).unwrap();
        assert!(!again.child_views_added);
    }

    #[test]
    fn test_view_marker_contents_untouched() {
        let (mut dom, root) = container();
        let marker = MarkupElement::new("div")
            .with_attr("id", "child")
            .with_attr(PHX_SESSION, "abc");
        dom.patch(root, &Markup::from_elements([marker.clone()]), &mut Recorder::default())
            .unwrap();
        let child = dom.element_by_id("child").unwrap();
        dom.append(child, &MarkupElement::new("span").with_attr("id", "inner"));

        dom.patch(root, &Markup::from_elements([marker]), &mut Recorder::default())
            .unwrap();
        assert!(dom.element_by_id("inner").is_some());
    }

    #[test]
    fn test_destroyed_marker_takes_new_session() {
        let (mut dom, root) = container();
        let marker = MarkupElement::new("div")
            .with_attr("id", "child")
            .with_attr(PHX_SESSION, "abc");
        dom.patch(root, &Markup::from_elements([marker.clone()]), &mut Recorder::default())
            .unwrap();
        let child = dom.element_by_id("child").unwrap();

        dom.set_attribute(child, PHX_SESSION, "changed");
        dom.patch(root, &Markup::from_elements([marker.clone()]), &mut Recorder::default())
            .unwrap();
        assert_eq!(dom.attribute(child, PHX_SESSION).as_deref(), Some("changed"));

        dom.set_attribute(child, PHX_SESSION, "");
        dom.patch(root, &Markup::from_elements([marker]), &mut Recorder::default())
            .unwrap();
        assert_eq!(dom.attribute(child, PHX_SESSION).as_deref(), Some("abc"));
    }

    #[test]
    fn test_files_survive_patch() {
        let (mut dom, root) = container();
        let target = Markup::from_elements([MarkupElement::new("input")
            .with_attr("id", "f")
            .with_attr("type", "file")]);
        dom.patch(root, &target, &mut Recorder::default()).unwrap();
        let input = dom.element_by_id("f").unwrap();
        dom.set_files(input, vec![FileInfo::new("a.png", 10, "image/png")]);

        dom.patch(root, &target, &mut Recorder::default()).unwrap();
        assert_eq!(dom.files(input).len(), 1);
    }

    #[test]
    fn test_form_data_skips_unchecked_and_files() {
        let dom = MemoryDom::from_markup(&Markup::from_elements([MarkupElement::new("form")
            .with_attr("id", "f")
            .with_child(MarkupElement::new("input").with_attr("name", "title").with_attr("value", "hi"))
            .with_child(MarkupElement::new("input").with_attr("name", "agree").with_attr("type", "checkbox"))
            .with_child(
                MarkupElement::new("input")
                    .with_attr("name", "sub")
                    .with_attr("type", "checkbox")
                    .with_attr("checked", ""),
            )
            .with_child(MarkupElement::new("input").with_attr("name", "avatar").with_attr("type", "file"))
            .with_child(MarkupElement::new("button").with_attr("name", "go"))]));
        let form = dom.element_by_id("f").unwrap();
        assert_eq!(
            dom.form_data(form),
            vec![
                ("title".to_string(), "hi".to_string()),
                ("sub".to_string(), "on".to_string())
            ]
        );
        assert_eq!(dom.form_elements(form).len(), 5);
    }

    #[test]
    fn test_classes() {
        let (mut dom, root) = container();
        dom.add_class(root, "phx-connected");
        dom.add_class(root, "phx-connected");
        assert_eq!(dom.attribute(root, "class").as_deref(), Some("phx-connected"));
        dom.remove_class(root, "phx-connected");
        assert!(!dom.has_class(root, "phx-connected"));
    }
}
