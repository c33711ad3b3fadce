//! Configuration paths
//!
//! Utilities for resolving configuration and data file locations.

use std::path::PathBuf;

/// Directory name used for project-local configuration.
pub const PROJECT_DIR_NAME: &str = ".openforge";

/// Enterprise-wide configuration directory.
pub fn enterprise_dir() -> PathBuf {
    PathBuf::from("/etc/openforge")
}

/// Per-user configuration directory (`~/.openforge`).
pub fn user_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PROJECT_DIR_NAME)
}

/// Project configuration directory (`./.openforge`).
pub fn project_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(PROJECT_DIR_NAME)
}

/// Per-user data root for plugins and state.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("openforge")
}

/// Data directory for one plugin.
pub fn plugin_data_dir(plugin_id: &str) -> PathBuf {
    data_dir().join("plugins").join(plugin_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_end_with_expected_components() {
        assert!(user_dir().ends_with(PROJECT_DIR_NAME));
        assert!(project_dir().ends_with(PROJECT_DIR_NAME));
        assert!(plugin_data_dir("p1").ends_with("plugins/p1"));
    }
}
