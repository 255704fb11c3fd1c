//! Default tool set (§4.C) — wires `exec`, `process`, and the file-ops
//! family into a [`ToolRegistry`] as [`ToolHandler`] implementations.
//!
//! Each handler is a thin adapter: it deserializes `args`, delegates to
//! the corresponding free function in [`crate::exec`], [`crate::process`],
//! or [`crate::file_ops`], and serializes the result back to a string
//! (tools speak JSON-as-text to the model, not structured `Value`s).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sa_domain::error::Result;
use serde_json::Value;

use crate::exec::{exec, ExecRequest};
use crate::file_ops::{
    file_append, file_delete, file_list, file_move, file_read, file_write, FileAppendRequest,
    FileDeleteRequest, FileListRequest, FileMoveRequest, FileReadRequest, FileWriteRequest,
};
use crate::manager::ProcessManager;
use crate::process::{handle_process, ProcessRequest};
use crate::registry::{ChatContext, SideEffectClass, Tool, ToolHandler, ToolRegistry};

fn bad_args(e: serde_json::Error) -> String {
    format!("invalid arguments: {e}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// exec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ExecHandler {
    manager: Arc<ProcessManager>,
}

#[async_trait]
impl ToolHandler for ExecHandler {
    async fn call(&self, args: Value, _ctx: &ChatContext) -> std::result::Result<String, String> {
        let req: ExecRequest = serde_json::from_value(args).map_err(bad_args)?;
        let resp = exec(&self.manager, req).await;
        serde_json::to_string(&resp).map_err(|e| format!("serializing exec response: {e}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ProcessHandler {
    manager: Arc<ProcessManager>,
}

#[async_trait]
impl ToolHandler for ProcessHandler {
    async fn call(&self, args: Value, _ctx: &ChatContext) -> std::result::Result<String, String> {
        let req: ProcessRequest = serde_json::from_value(args).map_err(bad_args)?;
        let resp = handle_process(&self.manager, req).await;
        serde_json::to_string(&resp).map_err(|e| format!("serializing process response: {e}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file ops
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

macro_rules! file_handler {
    ($name:ident, $req:ty, $func:ident) => {
        struct $name {
            workspace_root: PathBuf,
        }

        #[async_trait]
        impl ToolHandler for $name {
            async fn call(
                &self,
                args: Value,
                _ctx: &ChatContext,
            ) -> std::result::Result<String, String> {
                let req: $req = serde_json::from_value(args).map_err(bad_args)?;
                let result = $func(&self.workspace_root, req).await?;
                serde_json::to_string(&result).map_err(|e| format!("serializing result: {e}"))
            }
        }
    };
}

file_handler!(FileReadHandler, FileReadRequest, file_read);
file_handler!(FileWriteHandler, FileWriteRequest, file_write);
file_handler!(FileAppendHandler, FileAppendRequest, file_append);
file_handler!(FileMoveHandler, FileMoveRequest, file_move);
file_handler!(FileDeleteHandler, FileDeleteRequest, file_delete);
file_handler!(FileListHandler, FileListRequest, file_list);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build and register the full default tool set against a workspace root
/// and a shared [`ProcessManager`].
pub fn register_default(
    registry: &mut ToolRegistry,
    workspace_root: PathBuf,
    manager: Arc<ProcessManager>,
) -> Result<()> {
    registry
        .register(Tool {
            name: "exec".into(),
            description: "Run a shell command. Runs in the foreground until it completes or \
                yield_ms elapses, whichever comes first; a command still running at that point \
                is auto-backgrounded and returned as a session_id for `process`."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "background": {"type": "boolean"},
                    "yield_ms": {"type": "integer"},
                    "timeout_sec": {"type": "integer"},
                    "workdir": {"type": "string"},
                    "env": {"type": "object"},
                },
                "required": ["command"],
            }),
            side_effect_class: SideEffectClass::External,
            handler: Arc::new(ExecHandler { manager: manager.clone() }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "process".into(),
            description: "Manage background processes started by exec: list, poll for new \
                output, fetch tail logs, write to stdin, kill, clear finished sessions, or \
                remove a session's record."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"]},
                    "session_id": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"},
                    "tail_lines": {"type": "integer"},
                    "data": {"type": "string"},
                    "eof": {"type": "boolean"},
                },
                "required": ["action"],
            }),
            side_effect_class: SideEffectClass::Destructive,
            handler: Arc::new(ProcessHandler { manager }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "file_read".into(),
            description: "Read a file within the workspace, optionally by line offset/limit."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"},
                },
                "required": ["path"],
            }),
            side_effect_class: SideEffectClass::ReadOnly,
            handler: Arc::new(FileReadHandler { workspace_root: workspace_root.clone() }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "file_write".into(),
            description: "Create or overwrite a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                },
                "required": ["path", "content"],
            }),
            side_effect_class: SideEffectClass::Write,
            handler: Arc::new(FileWriteHandler { workspace_root: workspace_root.clone() }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "file_append".into(),
            description: "Append content to a file within the workspace, creating it if absent."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                },
                "required": ["path", "content"],
            }),
            side_effect_class: SideEffectClass::Write,
            handler: Arc::new(FileAppendHandler { workspace_root: workspace_root.clone() }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "file_move".into(),
            description: "Move or rename a file or directory within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "source": {"type": "string"},
                    "destination": {"type": "string"},
                },
                "required": ["source", "destination"],
            }),
            side_effect_class: SideEffectClass::Write,
            handler: Arc::new(FileMoveHandler { workspace_root: workspace_root.clone() }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "file_delete".into(),
            description: "Delete a file or empty directory within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                },
                "required": ["path"],
            }),
            side_effect_class: SideEffectClass::Destructive,
            handler: Arc::new(FileDeleteHandler { workspace_root: workspace_root.clone() }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    registry
        .register(Tool {
            name: "file_list".into(),
            description: "List directory contents within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                },
                "required": [],
            }),
            side_effect_class: SideEffectClass::ReadOnly,
            handler: Arc::new(FileListHandler { workspace_root }),
        })
        .map_err(|e| sa_domain::error::Error::Other(e.to_string()))?;

    Ok(())
}
