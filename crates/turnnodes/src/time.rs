use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use turncore::{NodeContext, NodeError, NodeHandler};
use turnruntime::HandlerMetadata;

pub const TIME_DELAY: &str = "time.delay";

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeHandler for DelayNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError> {
        // Default to 1 second if not specified
        let delay_ms = ctx.parameter_u64("delay_ms").unwrap_or(1000);

        tracing::debug!(node_id = %ctx.node_id, "Delaying for {}ms", delay_ms);

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(None),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

pub(crate) fn metadata() -> HandlerMetadata {
    HandlerMetadata {
        description: "Delay execution for delay_ms milliseconds; produces no output".to_string(),
        category: "time".to_string(),
    }
}
