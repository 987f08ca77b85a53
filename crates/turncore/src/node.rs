use crate::{NodeError, NodeId, SharedContext};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Executes the work of one workflow node type.
///
/// The engine only looks at the returned value: `Ok(Some(_))` is an output,
/// `Ok(None)` means the node produced nothing, `Err(_)` fails the run.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError>;
}

/// Execution context passed to each handler invocation
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Static parameters of this node, copied from the workflow
    pub parameters: HashMap<String, Value>,

    /// Run-wide scratchpad
    pub shared: SharedContext,

    /// Caller-supplied cancellation signal; the engine never triggers it
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, shared: SharedContext) -> Self {
        Self {
            node_id: node_id.into(),
            parameters: HashMap::new(),
            shared,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Get required parameter or return error
    pub fn require_parameter(&self, name: &str) -> Result<&Value, NodeError> {
        self.parameters
            .get(name)
            .ok_or_else(|| NodeError::InvalidParameter {
                name: name.to_string(),
                reason: "missing".to_string(),
            })
    }

    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_str())
    }

    pub fn parameter_u64(&self, name: &str) -> Option<u64> {
        self.parameters.get(name).and_then(|v| v.as_u64())
    }

    /// Fail with `NodeError::Cancelled` once the caller has cancelled the run.
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.cancellation.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Adapter so plain async closures can act as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> NodeHandler for FnHandler<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Option<Value>, NodeError>> + Send,
{
    async fn execute(&self, ctx: NodeContext) -> Result<Option<Value>, NodeError> {
        (self.0)(ctx).await
    }
}
