//! Hook configuration and the hook registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use globset::Glob;
use serde::{Deserialize, Serialize};

use super::events::HookEvent;

/// Minimum hook timeout in seconds.
pub const MIN_TIMEOUT_SECS: f64 = 0.1;

/// Maximum hook timeout in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 300.0;

const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

/// A configured subprocess hook.
///
/// The event pattern is one or more comma-separated colon-segment globs
/// matched against `category:event[:tool]`, e.g. `tool:pre_execute:bash`,
/// `llm:*`, or `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// Event pattern
    #[serde(rename = "event")]
    pub event_pattern: String,
    /// Command line executed via the shell
    pub command: String,
    /// Timeout in seconds, clamped to [0.1, 300]
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_timeout",
        skip_serializing_if = "is_default_timeout"
    )]
    pub timeout: f64,
    /// Working directory for the hook process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment entries
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Disabled hooks are never dispatched
    #[serde(default = "default_enabled", skip_serializing_if = "is_true")]
    pub enabled: bool,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn is_default_timeout(timeout: &f64) -> bool {
    (*timeout - DEFAULT_TIMEOUT_SECS).abs() < f64::EPSILON
}

fn default_enabled() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn clamp_timeout(timeout: f64) -> f64 {
    timeout.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(clamp_timeout(raw))
}

impl Hook {
    /// Create an enabled hook with the default timeout.
    pub fn new(event_pattern: impl Into<String>, command: impl Into<String>) -> Self {
        Hook {
            event_pattern: event_pattern.into(),
            command: command.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            working_dir: None,
            env: HashMap::new(),
            enabled: true,
            description: String::new(),
        }
    }

    /// Builder: set the timeout (clamped).
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = clamp_timeout(seconds);
        self
    }

    /// Builder: set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Builder: add an environment entry.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Builder: disable the hook.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Timeout as a duration.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(clamp_timeout(self.timeout))
    }

    /// Whether this hook should fire for an event.
    pub fn matches(&self, event: &HookEvent) -> bool {
        let full_name = event.full_name();
        self.event_pattern
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .any(|pattern| pattern_matches(pattern, &full_name))
    }
}

/// Match one colon-segment glob pattern against an event name.
///
/// The pattern constrains only as many segments as it has: `tool:*`
/// matches `tool:pre_execute:bash`, while `tool:pre_execute:bash`
/// requires all three segments.
fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_segments: Vec<&str> = pattern.split(':').collect();
    let event_segments: Vec<&str> = event_name.split(':').collect();

    if pattern_segments.len() > event_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(event_segments.iter())
        .all(|(p, e)| segment_matches(p, e))
}

fn segment_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') && !pattern.contains('?') {
        return pattern == value;
    }
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(value),
        Err(_) => pattern == value,
    }
}

/// Registry of configured hooks.
///
/// A process-wide singleton so every subsystem dispatches through the
/// same hook set; iteration always happens on a snapshot.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Hook>>,
}

static GLOBAL: OnceLock<Arc<HookRegistry>> = OnceLock::new();

impl HookRegistry {
    /// Create a private registry (used by tests and embedded setups).
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> Arc<HookRegistry> {
        GLOBAL.get_or_init(|| Arc::new(HookRegistry::new())).clone()
    }

    /// Drop every hook from the global registry. Test hook only.
    pub fn reset_for_test() {
        if let Some(global) = GLOBAL.get() {
            global.clear();
        }
    }

    /// Register a hook.
    pub fn register(&self, hook: Hook) {
        self.hooks.write().expect("hook registry poisoned").push(hook);
    }

    /// Remove every hook with the given pattern. Returns whether any
    /// were removed.
    pub fn unregister(&self, event_pattern: &str) -> bool {
        let mut hooks = self.hooks.write().expect("hook registry poisoned");
        let before = hooks.len();
        hooks.retain(|h| h.event_pattern != event_pattern);
        hooks.len() != before
    }

    /// Snapshot of enabled hooks matching an event.
    pub fn get_hooks(&self, event: &HookEvent) -> Vec<Hook> {
        self.hooks
            .read()
            .expect("hook registry poisoned")
            .iter()
            .filter(|h| h.enabled && h.matches(event))
            .cloned()
            .collect()
    }

    /// Replace nothing; bulk-append hooks (e.g. from config files).
    pub fn load_hooks(&self, hooks: Vec<Hook>) {
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .extend(hooks);
    }

    /// Remove all hooks.
    pub fn clear(&self) {
        self.hooks.write().expect("hook registry poisoned").clear();
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.read().expect("hook registry poisoned").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all hooks.
    pub fn hooks(&self) -> Vec<Hook> {
        self.hooks.read().expect("hook registry poisoned").clone()
    }
}
