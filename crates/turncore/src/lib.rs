//! Core abstractions for the turn engine
//!
//! This crate provides the workflow data model, the run-scoped shared
//! context, the handler trait and the error types that every other crate
//! depends on. It has no runtime dependencies beyond tokio primitives.

mod context;
mod error;
pub mod events;
mod node;
mod workflow;

pub use context::{output_key, ContextSnapshot, RunOutcome, SharedContext, OUTPUT_KEY_PREFIX, ROUND_KEY};
pub use error::{FlowError, LockError, NodeError, WorkflowError};
pub use events::*;
pub use node::{FnHandler, NodeContext, NodeHandler};
pub use workflow::{Edge, Node, NodeId, Position, Step, Workflow, WorkflowId};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
