//! Fixed attribute and class names shared with the server-rendered markup
//!
//! Binding attributes (`phx-change`, `phx-hook`, ...) depend on a configurable
//! prefix and live in the engine's configuration instead.

/// Lock token carried by an element while an operation is in flight
pub const PHX_REF: &str = "data-phx-ref";
/// Saved text of an element whose text was swapped by `disable-with`
pub const PHX_DISABLE_WITH_RESTORE: &str = "data-phx-disable-with-restore";
/// Saved `disabled` flag of a locked element
pub const PHX_DISABLED: &str = "data-phx-disabled";
/// Saved `readonly` flag of a locked element
pub const PHX_READONLY: &str = "data-phx-readonly";

/// Marks a view container; value is the signed session
pub const PHX_SESSION: &str = "data-phx-session";
/// Static token of a view container
pub const PHX_STATIC: &str = "data-phx-static";
/// View type name of a view container
pub const PHX_VIEW: &str = "data-phx-view";
/// Id of the view owning a nested view container
pub const PHX_PARENT_ID: &str = "data-phx-parent-id";
/// Id of the root view, set when a container is attached
pub const PHX_ROOT_ID: &str = "data-phx-root-id";
/// Component id of a component container
pub const PHX_COMPONENT: &str = "data-phx-component";
/// Upload reference of a file input
pub const PHX_UPLOAD_REF: &str = "data-phx-upload-ref";
/// Present on file inputs that upload as soon as files are selected
pub const PHX_AUTO_UPLOAD: &str = "data-phx-auto-upload";
/// Hook name declared without the binding prefix
pub const PHX_DATA_HOOK: &str = "data-phx-hook";
/// Marks a component container the reconciler must leave untouched
pub const PHX_SKIP: &str = "data-phx-skip";

/// Container class while connected
pub const PHX_CONNECTED_CLASS: &str = "phx-connected";
/// Container class while disconnected or loading
pub const PHX_DISCONNECTED_CLASS: &str = "phx-disconnected";
/// Container class after a transport error
pub const PHX_ERROR_CLASS: &str = "phx-error";

/// Event kinds that add a `phx-<kind>-loading` class while locked
pub const PHX_EVENT_KINDS: &[&str] = &[
    "click", "change", "submit", "keydown", "keyup", "blur", "focus", "hook",
];

/// Loading class for an event kind
pub fn loading_class(kind: &str) -> String {
    format!("phx-{}-loading", kind)
}

/// Input types whose value is only sent when checked
pub const CHECKABLE_INPUTS: &[&str] = &["checkbox", "radio"];

/// Tags that take part in form serialization
pub const FORM_FIELD_TAGS: &[&str] = &["input", "textarea", "select", "button"];
