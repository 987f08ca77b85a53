use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised by a node handler. They travel up to the caller unchanged.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("No handler for workflow node type {0}")]
    MissingHandler(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone)]
pub enum LockError {
    #[error("Timed out after {waited_ms}ms waiting for turn lock on '{key}'")]
    Timeout { key: String, waited_ms: u64 },

    #[error("Lock store error: {0}")]
    Store(String),
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}
