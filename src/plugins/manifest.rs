//! Plugin manifest - metadata and declared capabilities.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginError;

/// Plugin manifest filename
pub const PLUGIN_MANIFEST_FILENAME: &str = "openforge.plugin.json";

/// Capabilities a plugin may declare.
///
/// A plugin can only contribute in areas it declares; undeclared
/// contributions are a lifecycle error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// May register tools
    #[serde(default)]
    pub tools: bool,
    /// May register commands
    #[serde(default)]
    pub commands: bool,
    /// May register hook handlers
    #[serde(default)]
    pub hooks: bool,
    /// May register agent types
    #[serde(default)]
    pub subagents: bool,
    /// May register skills
    #[serde(default)]
    pub skills: bool,
    /// May touch the host system outside its data directory
    #[serde(default)]
    pub system_access: bool,
}

/// Plugin manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin ID (used as the registration prefix)
    pub id: String,
    /// Plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// Plugin description
    #[serde(default)]
    pub description: String,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: PluginCapabilities,
    /// Plugin-specific configuration
    #[serde(default)]
    pub config: Value,
    /// Plugin author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Plugin homepage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
}

impl PluginManifest {
    /// Create a new plugin manifest
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        PluginManifest {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Builder: set capabilities
    pub fn with_capabilities(mut self, capabilities: PluginCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Validate the manifest fields.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.is_empty() {
            return Err(PluginError::Manifest("plugin id is empty".to_string()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PluginError::Manifest(format!(
                "plugin id '{}' contains invalid characters",
                self.id
            )));
        }
        if self.version.is_empty() {
            return Err(PluginError::Manifest(format!(
                "plugin '{}' has no version",
                self.id
            )));
        }
        Ok(())
    }
}

/// Load and validate a plugin manifest from a file
pub fn load_manifest(path: &Path) -> Result<PluginManifest, PluginError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PluginError::Load(format!("{}: {}", path.display(), e)))?;
    let manifest: PluginManifest = serde_json::from_str(&content)
        .map_err(|e| PluginError::Manifest(format!("{}: {}", path.display(), e)))?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_validation() {
        let manifest = PluginManifest::new("web-tools", "Web Tools", "1.0.0")
            .with_capabilities(PluginCapabilities {
                tools: true,
                ..Default::default()
            });
        assert!(manifest.validate().is_ok());
        assert!(manifest.capabilities.tools);
    }

    #[test]
    fn empty_id_rejected() {
        let manifest = PluginManifest::new("", "X", "1.0.0");
        assert!(matches!(
            manifest.validate(),
            Err(PluginError::Manifest(_))
        ));
    }

    #[test]
    fn invalid_id_characters_rejected() {
        let manifest = PluginManifest::new("bad id!", "X", "1.0.0");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn missing_version_rejected() {
        let manifest = PluginManifest::new("ok-id", "X", "");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn manifest_roundtrip() {
        let original = PluginManifest::new("p1", "Plugin One", "0.2.0").with_capabilities(
            PluginCapabilities {
                tools: true,
                hooks: true,
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&original).unwrap();
        let restored: PluginManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn load_manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PLUGIN_MANIFEST_FILENAME);
        std::fs::write(
            &path,
            r#"{"id": "disk-plugin", "name": "Disk", "version": "1.0.0",
               "capabilities": {"tools": true}}"#,
        )
        .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.id, "disk-plugin");
        assert!(manifest.capabilities.tools);
    }

    #[test]
    fn load_manifest_bad_json_is_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PLUGIN_MANIFEST_FILENAME);
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_manifest(&path),
            Err(PluginError::Manifest(_))
        ));
    }
}
