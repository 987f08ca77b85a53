use async_trait::async_trait;
use serde_json::Value;
use turncore::{NodeContext, NodeError, NodeHandler};
use turnruntime::HandlerMetadata;

pub const CONTEXT_SET: &str = "context.set";

/// Writes the `value` parameter into the shared context under `key`.
/// Produces no output of its own.
pub struct SetContextNode;

#[async_trait]
impl NodeHandler for SetContextNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError> {
        let key = ctx
            .parameter_str("key")
            .ok_or_else(|| NodeError::InvalidParameter {
                name: "key".to_string(),
                reason: "expected a string".to_string(),
            })?;
        let value = ctx.parameters.get("value").cloned().unwrap_or(Value::Null);

        ctx.shared.set(key, value).await;
        Ok(None)
    }
}

pub(crate) fn metadata() -> HandlerMetadata {
    HandlerMetadata {
        description: "Stores the value parameter in the shared context under key".to_string(),
        category: "context".to_string(),
    }
}
