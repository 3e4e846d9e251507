//! Hook instances of one view

use std::collections::BTreeMap;

use livelink_core::{Dom, Hook, HookCommand, HookContext, HookRegistry, NodeId, ViewId};
use livelink_core::constants::PHX_DATA_HOOK;
use tracing::{debug, warn};

/// Live hook instances keyed by element
#[derive(Default)]
pub struct ViewHooks {
    hooks: BTreeMap<NodeId, Box<dyn Hook>>,
}

impl std::fmt::Debug for ViewHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHooks")
            .field("elements", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ViewHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, el: NodeId) -> bool {
        self.hooks.contains_key(&el)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Elements with a live hook, in creation order of their node ids
    pub fn elements(&self) -> Vec<NodeId> {
        self.hooks.keys().copied().collect()
    }

    /// Create and mount the hook declared by `el`, if any
    ///
    /// Returns false when `el` declares no hook, already has one, or names a
    /// hook without a registered factory.
    pub fn mount(
        &mut self,
        registry: &HookRegistry,
        hook_attr: &str,
        view: &ViewId,
        dom: &dyn Dom,
        el: NodeId,
        commands: &mut Vec<HookCommand>,
    ) -> bool {
        if self.hooks.contains_key(&el) {
            return false;
        }
        let Some(name) = dom
            .attribute(el, hook_attr)
            .or_else(|| dom.attribute(el, PHX_DATA_HOOK))
        else {
            return false;
        };
        let Some(mut hook) = registry.create(&name) else {
            warn!(view = %view, hook = %name, "Unknown hook, no factory registered");
            return false;
        };
        if dom.attribute(el, "id").is_none() {
            warn!(view = %view, hook = %name, "Hook element has no id");
        }
        debug!(view = %view, hook = %name, el = %el, "Mounting hook");
        hook.mounted(&mut HookContext::new(view, el, dom, commands));
        self.hooks.insert(el, hook);
        true
    }

    /// Run `f` against the hook of `el`, if any
    pub fn call(
        &mut self,
        view: &ViewId,
        dom: &dyn Dom,
        el: NodeId,
        commands: &mut Vec<HookCommand>,
        f: impl FnOnce(&mut dyn Hook, &mut HookContext<'_>),
    ) -> bool {
        let Some(hook) = self.hooks.get_mut(&el) else {
            return false;
        };
        f(hook.as_mut(), &mut HookContext::new(view, el, dom, commands));
        true
    }

    /// Run `f` against every hook
    pub fn call_all(
        &mut self,
        view: &ViewId,
        dom: &dyn Dom,
        commands: &mut Vec<HookCommand>,
        mut f: impl FnMut(&mut dyn Hook, &mut HookContext<'_>),
    ) {
        for (el, hook) in self.hooks.iter_mut() {
            f(hook.as_mut(), &mut HookContext::new(view, *el, dom, commands));
        }
    }

    /// Destroy the hook of `el`
    pub fn destroy(&mut self, view: &ViewId, dom: &dyn Dom, el: NodeId, commands: &mut Vec<HookCommand>) -> bool {
        let Some(mut hook) = self.hooks.remove(&el) else {
            return false;
        };
        hook.destroyed(&mut HookContext::new(view, el, dom, commands));
        true
    }

    /// Destroy every hook
    pub fn destroy_all(&mut self, view: &ViewId, dom: &dyn Dom, commands: &mut Vec<HookCommand>) {
        for (el, mut hook) in std::mem::take(&mut self.hooks) {
            hook.destroyed(&mut HookContext::new(view, el, dom, commands));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use livelink_core::{Markup, MarkupElement, MemoryDom};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Hook for Recorder {
        fn mounted(&mut self, _ctx: &mut HookContext<'_>) {
            self.0.lock().push("mounted".into());
        }

        fn destroyed(&mut self, _ctx: &mut HookContext<'_>) {
            self.0.lock().push("destroyed".into());
        }
    }

    fn setup() -> (MemoryDom, NodeId, HookRegistry, Arc<Mutex<Vec<String>>>) {
        let markup = Markup::from_elements([MarkupElement::new("div")
            .with_attr("id", "chart")
            .with_attr("phx-hook", "Chart")]);
        let dom = MemoryDom::from_markup(&markup);
        let el = dom.element_by_id("chart").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let registry = HookRegistry::new().with("Chart", move || Box::new(Recorder(Arc::clone(&shared))));
        (dom, el, registry, log)
    }

    #[test]
    fn test_mount_once_then_destroy() {
        let (dom, el, registry, log) = setup();
        let view = ViewId::new("v");
        let mut hooks = ViewHooks::new();
        let mut commands = Vec::new();

        assert!(hooks.mount(&registry, "phx-hook", &view, &dom, el, &mut commands));
        assert!(!hooks.mount(&registry, "phx-hook", &view, &dom, el, &mut commands));
        assert!(hooks.destroy(&view, &dom, el, &mut commands));
        assert!(hooks.is_empty());
        assert_eq!(*log.lock(), vec!["mounted", "destroyed"]);
    }

    #[test]
    fn test_unknown_hook_is_skipped() {
        let (dom, el, _registry, _log) = setup();
        let mut hooks = ViewHooks::new();
        let mounted = hooks.mount(&HookRegistry::new(), "phx-hook", &ViewId::new("v"), &dom, el, &mut Vec::new());
        assert!(!mounted);
        assert!(!hooks.contains(el));
    }
}
