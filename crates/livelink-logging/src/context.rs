//! Per-view log context
//!
//! The engine handles events for many views on one task. A
//! [`ViewContextGuard`] records which view is being handled in thread-local
//! storage so the subscriber can attach it to every span opened meanwhile.

use std::cell::RefCell;

use livelink_core::ViewId;
use uuid::Uuid;

/// View context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewContextData {
    /// Id of the view being handled
    pub view_id: String,
    /// Id of the root of the view's tree, when known
    pub root_id: Option<String>,
    /// Unique instance ID of this engine session
    pub instance_id: Uuid,
}

thread_local! {
    static VIEW_CONTEXT: RefCell<Option<ViewContextData>> = const { RefCell::new(None) };
}

/// RAII guard for view context
///
/// Creating the guard sets the view context of the current thread; dropping
/// it restores the previous one.
///
/// ```ignore
/// let _guard = ViewContextGuard::new(&view_id);
/// tracing::debug!("applying diff");
/// ```
pub struct ViewContextGuard {
    previous: Option<ViewContextData>,
}

impl ViewContextGuard {
    /// Enter the context of `view` with a fresh instance id
    pub fn new(view: &ViewId) -> Self {
        Self::enter(ViewContextData {
            view_id: view.to_string(),
            root_id: None,
            instance_id: Uuid::new_v4(),
        })
    }

    /// Enter the context of `view` inside the tree rooted at `root`,
    /// keeping the session's instance id
    pub fn with_root(view: &ViewId, root: &ViewId, instance_id: Uuid) -> Self {
        Self::enter(ViewContextData {
            view_id: view.to_string(),
            root_id: Some(root.to_string()),
            instance_id,
        })
    }

    fn enter(data: ViewContextData) -> Self {
        let previous = VIEW_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Get the current view context (if any)
    pub fn current() -> Option<ViewContextData> {
        VIEW_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current view id (if set)
    pub fn current_view_id() -> Option<String> {
        Self::current().map(|ctx| ctx.view_id)
    }
}

impl Drop for ViewContextGuard {
    fn drop(&mut self) {
        VIEW_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block inside the context of a view
///
/// ```ignore
/// with_view_context!(&view_id, {
///     tracing::info!("joined");
/// });
/// ```
#[macro_export]
macro_rules! with_view_context {
    ($view:expr, $body:block) => {{
        let _guard = $crate::context::ViewContextGuard::new($view);
        $body
    }};
}
