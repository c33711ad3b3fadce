//! Tools module - registry, dispatch pipeline, and shell supervision
//!
//! Each tool is a self-contained type implementing the `Tool` trait.
//! Tools are registered into a `ToolRegistry` (under source-derived
//! names), invoked through the `ToolDispatcher` pipeline
//! (resolve → validate → permission → hook pre → invoke → hook post),
//! and long-running commands live in the `ShellManager`.

pub mod builtin;
mod dispatch;
mod registry;
mod schema;
mod shell;
mod traits;

pub use builtin::register_builtins;
pub use dispatch::{DispatchErrorKind, ToolDispatcher};
pub use registry::{ToolRegistry, ToolSource};
pub use schema::{ParamType, ParameterSchema, PropertySpec};
pub use shell::{ShellManager, ShellProcess, ShellSnapshot, ShellStatus};
pub use traits::{ExecutionContext, Tool, ToolCall, ToolCategory, ToolResult};
