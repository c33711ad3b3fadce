//! Configuration module - layered settings with environment overrides
//!
//! Sources merge from lowest precedence to highest: built-in defaults,
//! enterprise-wide, user home, project directory, project local
//! overrides, then `RUNTIME_*` environment variables. Hook and
//! permission-rule files load through the same precedence.

mod io;
mod paths;
mod types;

pub use io::{
    deep_merge, env_overrides, load_config, load_config_from, load_hook_files,
    load_hook_files_from, load_permission_files, load_permission_files_from, ENV_PREFIX,
};
pub use paths::{
    data_dir, enterprise_dir, plugin_data_dir, project_dir, user_dir, PROJECT_DIR_NAME,
};
pub use types::{
    AgentSettings, ContextSettings, McpServerConfig, ProviderSettings, RuntimeConfig,
    ShellSettings, StrategyKind,
};
