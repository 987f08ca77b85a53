use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use turncore::{FnHandler, NodeContext, NodeError, NodeHandler, WorkflowError};

/// Metadata about a handler type
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn NodeHandler>,
    metadata: HandlerMetadata,
}

/// Handlers available to a run, keyed by node type.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Registration>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.register_described(node_type, handler, HandlerMetadata::default());
    }

    pub fn register_described(
        &mut self,
        node_type: impl Into<String>,
        handler: Arc<dyn NodeHandler>,
        metadata: HandlerMetadata,
    ) {
        let node_type = node_type.into();
        tracing::debug!("Registering handler for node type: {}", node_type);
        self.handlers
            .insert(node_type, Registration { handler, metadata });
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, node_type: impl Into<String>, f: F)
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, NodeError>> + Send + 'static,
    {
        self.register(node_type, Arc::new(FnHandler(f)));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).map(|r| r.handler.clone())
    }

    /// Look up the handler for `node_type`, failing the run when there is none.
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeHandler>, WorkflowError> {
        self.get(node_type)
            .ok_or_else(|| WorkflowError::MissingHandler(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<HandlerMetadata> {
        self.handlers.get(node_type).map(|r| r.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use turncore::SharedContext;

    #[tokio::test]
    async fn closures_register_as_handlers() {
        let mut table = HandlerTable::new();
        table.register_fn("echo", |ctx: NodeContext| async move { Ok(Some(json!(ctx.node_id))) });

        let handler = table.resolve("echo").unwrap();
        let output = handler
            .execute(NodeContext::new("n1", SharedContext::default()))
            .await
            .unwrap();

        assert_eq!(output, Some(json!("n1")));
        assert_eq!(table.list_node_types(), vec!["echo"]);
    }

    #[test]
    fn missing_type_names_the_type() {
        let table = HandlerTable::new();
        let err = table.resolve("agent").err().unwrap();
        assert_eq!(err.to_string(), "No handler for workflow node type agent");
    }
}
