use async_trait::async_trait;
use serde_json::Value;
use turncore::{NodeContext, NodeError, NodeHandler};
use turnruntime::HandlerMetadata;

pub const DEBUG_LOG: &str = "debug.log";

/// Logs its `message` parameter and returns it
pub struct DebugNode;

#[async_trait]
impl NodeHandler for DebugNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError> {
        let message = ctx.parameter_str("message").unwrap_or("(no message)");

        tracing::info!(node_id = %ctx.node_id, "DEBUG: {}", message);
        for (key, value) in &ctx.parameters {
            tracing::debug!(node_id = %ctx.node_id, "  {}: {}", key, value);
        }

        Ok(Some(Value::String(message.to_string())))
    }
}

pub(crate) fn metadata() -> HandlerMetadata {
    HandlerMetadata {
        description: "Logs the message parameter and outputs it".to_string(),
        category: "debug".to_string(),
    }
}
