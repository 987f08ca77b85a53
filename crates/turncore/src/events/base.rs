use crate::{NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// Events emitted while turns are acquired and workflows execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    LockAcquired {
        key: String,
        waited_ms: u64,
        timestamp: DateTime<Utc>,
    },
    LockReleased {
        key: String,
        timestamp: DateTime<Utc>,
    },
    RunStarted {
        run_id: RunId,
        workflow_id: WorkflowId,
        mode: String,
        timestamp: DateTime<Utc>,
    },
    LevelStarted {
        run_id: RunId,
        level: usize,
        node_ids: Vec<NodeId>,
        timestamp: DateTime<Utc>,
    },
    RoundStarted {
        run_id: RunId,
        round: u32,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        produced_output: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: RunId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for execution events. Emitting with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn node_started(&self, run_id: RunId, node_id: &str, node_type: &str) {
        self.emit(ExecutionEvent::NodeStarted {
            run_id,
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn node_completed(&self, run_id: RunId, node_id: &str, produced_output: bool, duration_ms: u64) {
        self.emit(ExecutionEvent::NodeCompleted {
            run_id,
            node_id: node_id.to_string(),
            produced_output,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn node_failed(&self, run_id: RunId, node_id: &str, error: impl ToString) {
        self.emit(ExecutionEvent::NodeFailed {
            run_id,
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
