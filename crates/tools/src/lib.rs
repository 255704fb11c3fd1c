//! Built-in tools for SerialAgent.
//!
//! Implements the exec/process tool pair following OpenClaw semantics:
//! - `exec`: run commands foreground or auto-background after yieldMs
//! - `process`: manage background sessions (list/poll/log/write/kill/clear/remove)

pub mod builtin;
pub mod exec;
pub mod file_ops;
pub mod manager;
pub mod process;
pub mod registry;

pub use manager::ProcessManager;
pub use registry::{ChatContext, SideEffectClass, Tool, ToolCallArgs, ToolHandler, ToolRegistry, ToolResult};
