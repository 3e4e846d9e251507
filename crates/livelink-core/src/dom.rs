//! Live document contract
//!
//! [`Dom`] combines the low-level document queries the engine needs with the
//! reconciler that applies a target [`Markup`] fragment to a container. The
//! reconciler reports every element it adds, updates or discards through a
//! [`PatchObserver`], which is how hooks, ref locks and component pruning
//! learn about a patch.

use serde::{Deserialize, Serialize};

use crate::constants::{CHECKABLE_INPUTS, FORM_FIELD_TAGS};
use crate::error::DomError;
use crate::identity::NodeId;
use crate::markup::{Markup, MarkupElement};

/// Boolean element state reflected as attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Disabled,
    ReadOnly,
    Checked,
}

impl Flag {
    /// Attribute reflecting the flag
    pub fn attribute(&self) -> &'static str {
        match self {
            Flag::Disabled => "disabled",
            Flag::ReadOnly => "readonly",
            Flag::Checked => "checked",
        }
    }
}

/// A file selected in a file input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
    pub last_modified: u64,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64, mime: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime: mime.into(),
            last_modified: 0,
        }
    }
}

/// What to do with an element the reconciler wants to update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Apply the target now
    Apply,
    /// Leave the element untouched; the observer keeps the target
    Defer,
}

/// Result of a patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// A view marker not previously in the document was added
    pub child_views_added: bool,
}

/// Callbacks fired by the reconciler
///
/// `discarded` runs before the element leaves the document so its attributes
/// can still be read.
pub trait PatchObserver {
    fn added(&mut self, _dom: &dyn Dom, _el: NodeId) {}

    fn before_update(
        &mut self,
        _dom: &dyn Dom,
        _el: NodeId,
        _target: &MarkupElement,
    ) -> UpdateDecision {
        UpdateDecision::Apply
    }

    fn updated(&mut self, _dom: &dyn Dom, _el: NodeId) {}

    fn discarded(&mut self, _dom: &dyn Dom, _el: NodeId) {}
}

/// Observer that ignores every callback
pub struct NoopObserver;

impl PatchObserver for NoopObserver {}

/// The live document
pub trait Dom: Send {
    /// Top-level element every attached element descends from
    fn document(&self) -> NodeId;

    /// Find an attached element by id
    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Lower-case tag of an element
    fn tag_name(&self, el: NodeId) -> Option<String>;

    fn attribute(&self, el: NodeId, name: &str) -> Option<String>;

    /// All attributes in document order
    fn attributes(&self, el: NodeId) -> Vec<(String, String)>;

    fn set_attribute(&mut self, el: NodeId, name: &str, value: &str);

    fn remove_attribute(&mut self, el: NodeId, name: &str);

    fn inner_text(&self, el: NodeId) -> String;

    /// Replace the element's children with a single text node
    fn set_inner_text(&mut self, el: NodeId, text: &str);

    /// Current value of a form field
    fn value(&self, el: NodeId) -> Option<String>;

    fn parent(&self, el: NodeId) -> Option<NodeId>;

    /// Child elements in document order
    fn children(&self, el: NodeId) -> Vec<NodeId>;

    /// Files selected in a file input
    fn files(&self, el: NodeId) -> Vec<FileInfo>;

    /// True unless the document is hidden
    fn is_visible(&self) -> bool;

    fn active_element(&self) -> Option<NodeId>;

    fn blur(&mut self, el: NodeId);

    /// Reconcile the children of `container` against `target`
    fn patch(
        &mut self,
        container: NodeId,
        target: &Markup,
        observer: &mut dyn PatchObserver,
    ) -> Result<PatchOutcome, DomError>;

    /// Reconcile a single element against `target`
    fn patch_element(
        &mut self,
        el: NodeId,
        target: &MarkupElement,
        observer: &mut dyn PatchObserver,
    ) -> Result<PatchOutcome, DomError>;

    fn has_attribute(&self, el: NodeId, name: &str) -> bool {
        self.attribute(el, name).is_some()
    }

    fn has_class(&self, el: NodeId, class: &str) -> bool {
        self.attribute(el, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    fn add_class(&mut self, el: NodeId, class: &str) {
        if self.has_class(el, class) {
            return;
        }
        let classes = match self.attribute(el, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attribute(el, "class", &classes);
    }

    fn remove_class(&mut self, el: NodeId, class: &str) {
        let Some(existing) = self.attribute(el, "class") else {
            return;
        };
        let remaining: Vec<&str> = existing.split_whitespace().filter(|c| *c != class).collect();
        self.set_attribute(el, "class", &remaining.join(" "));
    }

    fn flag(&self, el: NodeId, flag: Flag) -> bool {
        self.has_attribute(el, flag.attribute())
    }

    fn set_flag(&mut self, el: NodeId, flag: Flag, on: bool) {
        if on {
            self.set_attribute(el, flag.attribute(), "");
        } else {
            self.remove_attribute(el, flag.attribute());
        }
    }

    /// True if `el` is `ancestor` or inside it
    fn contains(&self, ancestor: NodeId, el: NodeId) -> bool {
        let mut current = Some(el);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Descendant elements of `el` in document order, excluding `el`
    fn descendants(&self, el: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(el).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }
        out
    }

    /// Descendants of `el` carrying attribute `name`
    fn query_attr(&self, el: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(el)
            .into_iter()
            .filter(|node| self.has_attribute(*node, name))
            .collect()
    }

    /// Nearest ancestor-or-self carrying attribute `name`
    fn closest_with_attr(&self, el: NodeId, name: &str) -> Option<NodeId> {
        let mut current = Some(el);
        while let Some(node) = current {
            if self.has_attribute(node, name) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Nearest enclosing `<form>` of a field
    fn form_of(&self, el: NodeId) -> Option<NodeId> {
        let mut current = self.parent(el);
        while let Some(node) = current {
            if self.tag_name(node).as_deref() == Some("form") {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Fields of a form in document order
    fn form_elements(&self, form: NodeId) -> Vec<NodeId> {
        self.descendants(form)
            .into_iter()
            .filter(|node| {
                self.tag_name(*node)
                    .is_some_and(|tag| FORM_FIELD_TAGS.contains(&tag.as_str()))
            })
            .collect()
    }

    /// Name/value pairs a form submission carries, file inputs excluded
    fn form_data(&self, form: NodeId) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for field in self.form_elements(form) {
            let Some(name) = self.attribute(field, "name").filter(|n| !n.is_empty()) else {
                continue;
            };
            if self.flag(field, Flag::Disabled) {
                continue;
            }
            let tag = self.tag_name(field).unwrap_or_default();
            let kind = self.attribute(field, "type").unwrap_or_default();
            if tag == "button" || kind == "file" || kind == "submit" {
                continue;
            }
            if CHECKABLE_INPUTS.contains(&kind.as_str()) && !self.flag(field, Flag::Checked) {
                continue;
            }
            let value = self.value(field).unwrap_or_else(|| {
                if CHECKABLE_INPUTS.contains(&kind.as_str()) {
                    "on".to_string()
                } else {
                    String::new()
                }
            });
            pairs.push((name, value));
        }
        pairs
    }
}
