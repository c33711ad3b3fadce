//! Configuration I/O - layered loading, deep merge, and environment
//! overrides.
//!
//! Sources, lowest precedence first: built-in defaults → enterprise →
//! user home → project directory → project local overrides →
//! environment variables prefixed `RUNTIME_`. Nested maps deep-merge;
//! leaves are replaced. JSON is parsed leniently (json5); YAML is the
//! fallback format.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hooks::Hook;
use crate::permissions::RuleSet;

use super::paths;
use super::types::RuntimeConfig;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RUNTIME_";

/// Load the runtime configuration from the standard locations.
pub fn load_config() -> Result<RuntimeConfig> {
    dotenvy::dotenv().ok();
    load_config_from(
        &paths::enterprise_dir(),
        &paths::user_dir(),
        &paths::project_dir(),
        std::env::vars(),
    )
}

/// Load with explicit directories (used by tests and embedders).
pub fn load_config_from(
    enterprise_dir: &Path,
    user_dir: &Path,
    project_dir: &Path,
    env: impl Iterator<Item = (String, String)>,
) -> Result<RuntimeConfig> {
    let mut merged = serde_json::to_value(RuntimeConfig::default())?;

    for dir in [enterprise_dir, user_dir, project_dir] {
        if let Some(value) = read_settings_file(dir)? {
            merged = deep_merge(merged, value);
        }
    }
    // Project-local overrides sit next to the project settings.
    if let Some(value) = read_named_file(&project_dir.join("settings.local.json"))? {
        merged = deep_merge(merged, value);
    }

    merged = deep_merge(merged, env_overrides(env));

    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))
}

/// Read `settings.json` (preferred) or `settings.yaml` from a directory.
fn read_settings_file(dir: &Path) -> Result<Option<Value>> {
    let json = dir.join("settings.json");
    if json.exists() {
        return read_named_file(&json);
    }
    for name in ["settings.yaml", "settings.yml"] {
        let yaml = dir.join(name);
        if yaml.exists() {
            return read_named_file(&yaml);
        }
    }
    Ok(None)
}

fn read_named_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let value = if path.extension().is_some_and(|ext| ext == "json") {
        // json5 tolerates comments and trailing commas.
        json5::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid JSON in {}: {}", path.display(), e)))?
    } else {
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid YAML in {}: {}", path.display(), e)))?
    };

    debug!("Loaded configuration from {}", path.display());
    Ok(Some(value))
}

/// Deep-merge `overlay` into `base`: objects merge key-by-key, anything
/// else replaces.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Build an override object from `RUNTIME_*` environment variables.
///
/// `RUNTIME_FOO__BAR=1` becomes `{"foo": {"bar": 1}}`; values parse as
/// JSON literals where possible, otherwise as strings.
pub fn env_overrides(env: impl Iterator<Item = (String, String)>) -> Value {
    let mut root = Value::Object(Map::new());

    for (key, raw) in env {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if stripped.is_empty() {
            continue;
        }

        let segments: Vec<String> = stripped
            .split("__")
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            continue;
        }

        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));

        // Build the nested object inside-out, then merge it in.
        let mut nested = value;
        for segment in segments.iter().rev() {
            let mut object = Map::new();
            object.insert(segment.clone(), nested);
            nested = Value::Object(object);
        }
        root = deep_merge(root, nested);
    }

    root
}

/// Load hook definitions from the standard locations, lowest precedence
/// first (global hooks load before project hooks).
pub fn load_hook_files() -> Result<Vec<Hook>> {
    load_hook_files_from(&[
        paths::user_dir().join("hooks.json"),
        paths::project_dir().join("hooks.json"),
    ])
}

/// Load hook definitions from explicit files, in order.
pub fn load_hook_files_from(files: &[PathBuf]) -> Result<Vec<Hook>> {
    let mut hooks = Vec::new();
    for path in files {
        let Some(value) = read_named_file(path)? else {
            continue;
        };
        let batch: Vec<Hook> = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid hooks in {}: {}", path.display(), e)))?;
        hooks.extend(batch);
    }
    Ok(hooks)
}

/// Load permission rules from the standard locations; later files merge
/// their rules onto earlier ones, and the last default level wins.
pub fn load_permission_files() -> Result<RuleSet> {
    load_permission_files_from(&[
        paths::enterprise_dir().join("permissions.json"),
        paths::user_dir().join("permissions.json"),
        paths::project_dir().join("permissions.json"),
    ])
}

/// Load permission rules from explicit files, in order.
pub fn load_permission_files_from(files: &[PathBuf]) -> Result<RuleSet> {
    let mut merged = RuleSet::new();
    for path in files {
        let Some(value) = read_named_file(path)? else {
            continue;
        };
        let ruleset = RuleSet::from_value(&value)
            .map_err(|e| Error::Config(format!("invalid rules in {}: {}", path.display(), e)))?;
        merged.default = ruleset.default;
        merged.rules.extend(ruleset.rules);
    }
    Ok(merged)
}
