//! Tool Registry + Executor (§4.C).
//!
//! Tools are opaque named capabilities to the core: the registry only
//! knows a name, a JSON-Schema-shaped parameter spec, a side-effect
//! class, and a dynamically dispatched handler. Concrete tool bodies
//! (file I/O, web fetch, code execution, payment rails, …) are the
//! host application's concern and are registered at startup, not baked
//! into this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sa_domain::error::{Error, Result};
use sa_domain::tool::ToolDefinition;
use serde_json::Value;

/// How risky invoking a tool is. Read-only tools never require approval;
/// `Destructive` and `External` tools consult the Approval Gate when the
/// calling context declares `require_approval = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SideEffectClass {
    ReadOnly,
    Write,
    Destructive,
    External,
}

use serde::{Deserialize, Serialize};

/// An immutable, registered tool. `parameters` is a JSON-Schema-like
/// value describing the expected `args` shape.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub side_effect_class: SideEffectClass,
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Context injected into every tool invocation. Tools may read from it
/// (e.g. to deliver an image back to the host channel) but never mutate
/// it — it is a read-only capsule over the calling turn's environment.
#[derive(Clone)]
pub struct ChatContext {
    pub session_key: String,
    pub agent_id: Option<String>,
    /// Whether the caller wants destructive/external tools gated behind
    /// an approval before they execute.
    pub require_approval: bool,
}

/// A dynamically dispatched tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ChatContext) -> std::result::Result<String, String>;
}

/// Result of executing one tool call — always a concrete value, never a
/// propagated exception (§4.C, §7 propagation policy).
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// `{name, args}` — the model's request to invoke a tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallArgs {
    pub name: String,
    pub args: Value,
}

/// Looks up tools by name, validates inputs, invokes, returns a uniform
/// result. Otherwise stateless: no per-call state is retained between
/// invocations.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if `name` is already present.
    pub fn register(&mut self, tool: Tool) -> Result<()> {
        if self.tools.contains_key(&tool.name) {
            return Err(Error::Other(format!(
                "tool \"{}\" is already registered",
                tool.name
            )));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// All registered tools; when `read_only_mode`, filtered to
    /// `SideEffectClass::ReadOnly`.
    pub fn list(&self, read_only_mode: bool) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| !read_only_mode || t.side_effect_class == SideEffectClass::ReadOnly)
            .map(Tool::definition)
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Validate `args` against the tool's declared parameter schema.
    /// This is a structural check (required properties present, object
    /// shape matches), not a full JSON-Schema validator — the same depth
    /// of validation the turn loop actually needs before dispatch.
    fn validate_args(tool: &Tool, args: &Value) -> std::result::Result<(), String> {
        let Some(schema_obj) = tool.parameters.as_object() else {
            return Ok(());
        };
        let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) else {
            return Ok(());
        };
        let Some(args_obj) = args.as_object() else {
            return Err("invalid arguments".into());
        };
        for field in required {
            let Some(field_name) = field.as_str() else {
                continue;
            };
            if !args_obj.contains_key(field_name) {
                return Err("invalid arguments".into());
            }
        }
        Ok(())
    }

    /// Validate args against the tool's schema, invoke it, and capture
    /// any failure as a structured `ToolResult` rather than letting it
    /// propagate.
    pub async fn execute(&self, call: &ToolCallArgs, ctx: &ChatContext) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::err(format!("unknown tool \"{}\"", call.name));
        };

        if let Err(msg) = Self::validate_args(tool, &call.args) {
            return ToolResult::err(msg);
        }

        match tool.handler.call(call.args.clone(), ctx).await {
            Ok(output) => ToolResult::ok(output),
            Err(e) => ToolResult::err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: &ChatContext) -> std::result::Result<String, String> {
            Ok(args.get("v").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }
    }

    fn echo_tool() -> Tool {
        Tool {
            name: "echo".into(),
            description: "echoes v".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"v": {"type": "string"}},
                "required": ["v"],
            }),
            side_effect_class: SideEffectClass::ReadOnly,
            handler: Arc::new(Echo),
        }
    }

    fn ctx() -> ChatContext {
        ChatContext {
            session_key: "s1".into(),
            agent_id: None,
            require_approval: false,
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool()).unwrap();
        assert!(reg.register(echo_tool()).is_err());
    }

    #[test]
    fn read_only_filter_excludes_write_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool()).unwrap();
        let mut write_tool = echo_tool();
        write_tool.name = "write_file".into();
        write_tool.side_effect_class = SideEffectClass::Write;
        reg.register(write_tool).unwrap();

        assert_eq!(reg.list(false).len(), 2);
        assert_eq!(reg.list(true).len(), 1);
    }

    #[tokio::test]
    async fn execute_missing_tool_returns_structured_error() {
        let reg = ToolRegistry::new();
        let result = reg
            .execute(&ToolCallArgs { name: "nope".into(), args: serde_json::json!({}) }, &ctx())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn execute_invalid_args_returns_structured_error() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool()).unwrap();
        let result = reg
            .execute(&ToolCallArgs { name: "echo".into(), args: serde_json::json!({}) }, &ctx())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("invalid arguments"));
    }

    #[tokio::test]
    async fn execute_success_returns_output() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool()).unwrap();
        let result = reg
            .execute(
                &ToolCallArgs { name: "echo".into(), args: serde_json::json!({"v": "42"}) },
                &ctx(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.output, "42");
    }
}
