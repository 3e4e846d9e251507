//! Behavior hooks bound to elements
//!
//! A hook is created for every element declaring `phx-hook="<Name>"` when a
//! factory for that name is registered. Hooks receive lifecycle callbacks
//! and may push events back to their view through [`HookContext`].

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::dom::Dom;
use crate::identity::{NodeId, RefToken, ViewId};

/// Outbound request issued by a hook
#[derive(Debug, Clone, PartialEq)]
pub enum HookCommand {
    PushEvent {
        el: NodeId,
        event: String,
        payload: Value,
    },
}

/// Context passed to every hook callback
pub struct HookContext<'a> {
    pub view: &'a ViewId,
    pub el: NodeId,
    pub dom: &'a dyn Dom,
    commands: &'a mut Vec<HookCommand>,
}

impl<'a> HookContext<'a> {
    pub fn new(
        view: &'a ViewId,
        el: NodeId,
        dom: &'a dyn Dom,
        commands: &'a mut Vec<HookCommand>,
    ) -> Self {
        Self {
            view,
            el,
            dom,
            commands,
        }
    }

    /// Push a hook event to the view; the reply comes back via
    /// [`Hook::handle_reply`]
    pub fn push_event(&mut self, event: impl Into<String>, payload: Value) {
        self.commands.push(HookCommand::PushEvent {
            el: self.el,
            event: event.into(),
            payload,
        });
    }
}

/// Element behavior
pub trait Hook: Send {
    fn mounted(&mut self, _ctx: &mut HookContext<'_>) {}

    fn before_update(&mut self, _ctx: &mut HookContext<'_>) {}

    fn updated(&mut self, _ctx: &mut HookContext<'_>) {}

    fn disconnected(&mut self, _ctx: &mut HookContext<'_>) {}

    fn reconnected(&mut self, _ctx: &mut HookContext<'_>) {}

    fn destroyed(&mut self, _ctx: &mut HookContext<'_>) {}

    /// Reply to an earlier [`HookContext::push_event`]
    fn handle_reply(&mut self, _ctx: &mut HookContext<'_>, _token: RefToken, _reply: &Value) {}
}

/// Creates hook instances
pub type HookFactory = Box<dyn Fn() -> Box<dyn Hook> + Send + Sync>;

/// Hook factories by name
#[derive(Default)]
pub struct HookRegistry {
    factories: HashMap<String, HookFactory>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Hook> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Hook> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the hook registered under `name`
    pub fn create(&self, name: &str) -> Option<Box<dyn Hook>> {
        self.factories.get(name).map(|factory| factory())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Hook for Noop {}

    #[test]
    fn test_registry_create() {
        let registry = HookRegistry::new().with("Chart", || Box::new(Noop));
        assert!(registry.contains("Chart"));
        assert!(registry.create("Chart").is_some());
        assert!(registry.create("Map").is_none());
    }
}
