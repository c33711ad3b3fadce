//! Built-in tools shipped with the runtime.

mod bash;
mod read_file;
mod write_file;

pub use bash::{BashOutputTool, BashTool, KillShellTool};
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

use std::sync::Arc;

use super::registry::{ToolRegistry, ToolSource};
use crate::error::Result;

/// Register every built-in tool into a registry.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(Arc::new(ReadFileTool), ToolSource::Builtin)?;
    registry.register(Arc::new(WriteFileTool), ToolSource::Builtin)?;
    registry.register(Arc::new(BashTool), ToolSource::Builtin)?;
    registry.register(Arc::new(BashOutputTool), ToolSource::Builtin)?;
    registry.register(Arc::new(KillShellTool), ToolSource::Builtin)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_builtins() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).unwrap();
        let names = registry.names();
        for expected in ["read_file", "write_file", "bash", "bash_output", "kill_shell"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry).unwrap();
        let count = registry.len();
        register_builtins(&mut registry).unwrap();
        assert_eq!(registry.len(), count);
    }
}
