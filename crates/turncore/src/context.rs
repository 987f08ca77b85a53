use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prefix of the context entry holding a node's most recent result.
pub const OUTPUT_KEY_PREFIX: &str = "__output_";

/// Context entry holding the current round of a cyclic run.
pub const ROUND_KEY: &str = "__round";

/// Plain copy of a context, as returned to callers.
pub type ContextSnapshot = HashMap<String, Value>;

pub fn output_key(node_id: &str) -> String {
    format!("{}{}", OUTPUT_KEY_PREFIX, node_id)
}

/// Run-scoped key/value scratchpad threaded through every node of one run.
///
/// Cloning yields another handle to the same map, so handlers running
/// concurrently inside a level all see each other's writes.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    values: Arc<RwLock<ContextSnapshot>>,
}

impl SharedContext {
    pub fn new(initial: Option<ContextSnapshot>) -> Self {
        Self {
            values: Arc::new(RwLock::new(initial.unwrap_or_default())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().await.remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }

    /// Record a node result under `__output_<node_id>`. A node that produced
    /// nothing is recorded as `null`.
    pub async fn set_output(&self, node_id: &str, output: Option<Value>) {
        self.set(output_key(node_id), output.unwrap_or(Value::Null))
            .await;
    }

    pub async fn output_of(&self, node_id: &str) -> Option<Value> {
        self.get(&output_key(node_id)).await
    }

    pub async fn set_round(&self, round: u32) {
        self.set(ROUND_KEY, round).await;
    }

    /// Current round of a cyclic run, if one is in progress.
    pub async fn round(&self) -> Option<u64> {
        self.get(ROUND_KEY).await.and_then(|v| v.as_u64())
    }

    /// Shallow copy of the current entries.
    pub async fn snapshot(&self) -> ContextSnapshot {
        self.values.read().await.clone()
    }
}

/// Result of one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Last value produced by the run; `None` when no node produced anything.
    pub output: Option<Value>,
    pub context: ContextSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn clones_share_entries() {
        let ctx = SharedContext::new(Some(HashMap::from([("seed".to_string(), json!(1))])));
        let other = ctx.clone();

        other.set("added", "value").await;

        assert_eq!(ctx.get("added").await, Some(json!("value")));
        assert_eq!(ctx.get("seed").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn snapshot_is_detached() {
        let ctx = SharedContext::default();
        ctx.set_output("n1", Some(json!("hello"))).await;

        let snapshot = ctx.snapshot().await;
        ctx.set_output("n1", None).await;

        assert_eq!(snapshot["__output_n1"], json!("hello"));
        assert_eq!(ctx.output_of("n1").await, Some(Value::Null));
    }

    #[tokio::test]
    async fn round_is_readable_after_set() {
        let ctx = SharedContext::default();
        assert_eq!(ctx.round().await, None);
        ctx.set_round(4).await;
        assert_eq!(ctx.round().await, Some(4));
    }
}
