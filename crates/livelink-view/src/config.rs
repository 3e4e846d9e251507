//! Configuration for the view engine

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default binding prefix
pub const DEFAULT_BINDING_PREFIX: &str = "phx-";

/// Reconnect backoff settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Lower bound of the jittered delay
    pub min_jitter: Duration,
    /// Upper bound of the jittered delay
    pub max_jitter: Duration,
    /// Delay used once `max_attempts` is exceeded
    pub failsafe_jitter: Duration,
    /// Consecutive failures tolerated before falling back to a page reload
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_jitter: Duration::from_secs(1),
            max_jitter: Duration::from_secs(3),
            failsafe_jitter: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Configuration for a [`LiveSocket`](crate::LiveSocket)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Prefix of every binding attribute
    pub binding_prefix: String,
    /// Delay before a joining view shows its loading state
    pub loader_timeout: Duration,
    /// Delay before showing the loading state when the page is unloading
    pub before_unload_loader_timeout: Duration,
    /// Timeout handed to the channel for every push
    pub push_timeout: Duration,
    /// Reconnect backoff
    pub reconnect: ReconnectConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            binding_prefix: DEFAULT_BINDING_PREFIX.to_string(),
            loader_timeout: Duration::from_millis(1),
            before_unload_loader_timeout: Duration::from_millis(200),
            push_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SocketConfig {
    /// Set the binding prefix
    pub fn with_binding_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.binding_prefix = prefix.into();
        self
    }

    /// Set the loader timeout
    pub fn with_loader_timeout(mut self, timeout: Duration) -> Self {
        self.loader_timeout = timeout;
        self
    }

    /// Set the push timeout
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Set the reconnect backoff
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Binding attribute names for this prefix
    pub fn bindings(&self) -> Bindings {
        Bindings::new(&self.binding_prefix)
    }
}

/// Binding attribute names derived from the prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bindings {
    prefix: String,
    change: String,
    submit: String,
    hook: String,
    disable_with: String,
    auto_recover: String,
    target: String,
    page_loading: String,
    progress: String,
    update: String,
    track_static: String,
    value_prefix: String,
}

impl Bindings {
    pub fn new(prefix: &str) -> Self {
        let name = |kind: &str| format!("{}{}", prefix, kind);
        Self {
            prefix: prefix.to_string(),
            change: name("change"),
            submit: name("submit"),
            hook: name("hook"),
            disable_with: name("disable-with"),
            auto_recover: name("auto-recover"),
            target: name("target"),
            page_loading: name("page-loading"),
            progress: name("progress"),
            update: name("update"),
            track_static: name("track-static"),
            value_prefix: name("value-"),
        }
    }

    /// Attribute for an arbitrary binding kind
    pub fn binding(&self, kind: &str) -> String {
        format!("{}{}", self.prefix, kind)
    }

    pub fn change(&self) -> &str {
        &self.change
    }

    pub fn submit(&self) -> &str {
        &self.submit
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    pub fn disable_with(&self) -> &str {
        &self.disable_with
    }

    pub fn auto_recover(&self) -> &str {
        &self.auto_recover
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn page_loading(&self) -> &str {
        &self.page_loading
    }

    pub fn progress(&self) -> &str {
        &self.progress
    }

    pub fn update(&self) -> &str {
        &self.update
    }

    pub fn track_static(&self) -> &str {
        &self.track_static
    }

    /// Prefix of `<prefix>value-<name>` attributes
    pub fn value_prefix(&self) -> &str {
        &self.value_prefix
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new(DEFAULT_BINDING_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SocketConfig::default();
        assert_eq!(config.binding_prefix, "phx-");
        assert_eq!(config.loader_timeout, Duration::from_millis(1));
        assert_eq!(config.before_unload_loader_timeout, Duration::from_millis(200));
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_bindings_follow_prefix() {
        let bindings = SocketConfig::default().with_binding_prefix("lv-").bindings();
        assert_eq!(bindings.change(), "lv-change");
        assert_eq!(bindings.disable_with(), "lv-disable-with");
        assert_eq!(bindings.value_prefix(), "lv-value-");
        assert_eq!(bindings.binding("click"), "lv-click");
    }

    #[test]
    fn test_config_serde() {
        let config = SocketConfig::default().with_push_timeout(Duration::from_secs(5));
        let json = serde_json::to_string(&config).unwrap();
        let back: SocketConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
