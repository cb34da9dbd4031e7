//! Tool system exposed to the model through function-calling.
//!
//! Each tool declares a JSON Schema for its parameters, enabling
//! OpenAI-format function definitions in the completion request. The active
//! set is not global: it is derived from the current scene at request time
//! and re-read again at dispatch time, since a scene transition may have
//! happened in between.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::message::Message;

/// The result of executing a tool, ready to feed back to the model.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    /// When set, the engine immediately requests another completion after
    /// this result lands, instead of waiting for the next poll tick.
    pub follow_up: bool,
}

impl ToolOutput {
    /// Output the assistant should react to right away. Most tools want
    /// this: a follow-up completion is how the model reports the result.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            follow_up: true,
        }
    }

    /// Output that can wait for the next poll tick.
    pub fn silent(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            follow_up: false,
        }
    }
}

/// A callable capability offered to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within the active set (e.g., "turn_dial").
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters, used directly in
    /// OpenAI-format function definitions.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute with the parsed argument payload. Argument validation is the
    /// handler's job; this layer is schema-less.
    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput>;
}

/// OpenAI-format function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// OpenAI-format tool definition (wraps FunctionDef).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// The set of tools active for the current scene.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Function definitions for the `tools` parameter of a completion
    /// request.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .iter()
            .map(|tool| ToolDef {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                },
            })
            .collect()
    }

    /// Execute every call on an assistant message, in the order the model
    /// emitted them, producing one tool-role message per call.
    ///
    /// Unknown names and handler failures become tool-role error messages;
    /// neither may terminate the engine. Every result carries the
    /// originating call's id.
    pub async fn dispatch(&self, assistant: &Message) -> Vec<Message> {
        let calls = match &assistant.tool_calls {
            Some(calls) => calls,
            None => return Vec::new(),
        };

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let name = &call.function.name;
            let args: serde_json::Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|e| {
                    tracing::warn!("Arguments for '{}' are not valid JSON: {}", name, e);
                    serde_json::json!({})
                });

            let result = match self.get(name) {
                None => {
                    tracing::warn!("Model requested unknown function '{}'", name);
                    // Recoverable: the model gets to react to the mistake.
                    Message::tool(&call.id, format!("Unknown function: {}", name))
                        .with_follow_up()
                }
                Some(tool) => match tool.execute(args).await {
                    Ok(output) => {
                        let mut msg = Message::tool(&call.id, output.content);
                        msg.follow_up = output.follow_up;
                        msg
                    }
                    Err(e) => {
                        tracing::warn!("Tool '{}' failed: {:#}", name, e);
                        Message::tool(&call.id, format!("Tool execution failed: {:#}", e))
                            .with_follow_up()
                    }
                },
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FunctionCall, Role, ToolCall};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input message"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo"
                    }
                },
                "required": ["message"]
            })
        }

        async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput> {
            let message = args["message"].as_str().unwrap_or("(no message)");
            Ok(ToolOutput::text(message.to_string()))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<ToolOutput> {
            anyhow::bail!("wires crossed")
        }
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        }
    }

    fn assistant_with(calls: Vec<ToolCall>) -> Message {
        Message {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
            follow_up: false,
        }
    }

    #[test]
    fn definitions_use_function_format() {
        let set = ToolSet::new(vec![Arc::new(EchoTool)]);
        let defs = set.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].tool_type, "function");
        assert_eq!(defs[0].function.name, "echo");
    }

    #[tokio::test]
    async fn dispatch_produces_one_result_per_call_in_order() {
        let set = ToolSet::new(vec![Arc::new(EchoTool), Arc::new(BrokenTool)]);
        let assistant = assistant_with(vec![
            call("c1", "echo", r#"{"message": "first"}"#),
            call("c2", "broken", "{}"),
            call("c3", "missing", "{}"),
            call("c4", "echo", r#"{"message": "last"}"#),
        ]);

        let results = set.dispatch(&assistant).await;
        assert_eq!(results.len(), 4);
        for (result, id) in results.iter().zip(["c1", "c2", "c3", "c4"]) {
            assert_eq!(result.role, Role::Tool);
            assert_eq!(result.tool_call_id.as_deref(), Some(id));
        }
        assert_eq!(results[0].text(), "first");
        assert!(results[1].text().contains("Tool execution failed"));
        assert!(results[1].follow_up);
        assert!(results[2].text().contains("Unknown function: missing"));
        assert!(results[2].follow_up);
        assert_eq!(results[3].text(), "last");
    }

    #[tokio::test]
    async fn malformed_arguments_fall_back_to_empty_object() {
        let set = ToolSet::new(vec![Arc::new(EchoTool)]);
        let assistant = assistant_with(vec![call("c1", "echo", "not json")]);

        let results = set.dispatch(&assistant).await;
        assert_eq!(results[0].text(), "(no message)");
    }

    #[tokio::test]
    async fn echo_output_requests_follow_up() {
        let set = ToolSet::new(vec![Arc::new(EchoTool)]);
        let assistant = assistant_with(vec![call("c1", "echo", r#"{"message": "hi"}"#)]);

        let results = set.dispatch(&assistant).await;
        assert!(results[0].follow_up);
    }

    #[tokio::test]
    async fn dispatch_without_calls_is_empty() {
        let set = ToolSet::new(vec![Arc::new(EchoTool)]);
        assert!(set
            .dispatch(&Message::assistant("plain text"))
            .await
            .is_empty());
    }
}
