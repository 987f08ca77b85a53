//! Workflow execution runtime
//!
//! This crate provides the turn engine: crash-durable per-key turn locks,
//! the DAG planner, the level executor, the cyclic round runner and the
//! runtime facade that ties them together.

mod config;
mod cyclic;
mod engine;
mod executor;
pub mod lock;
pub mod planner;
mod registry;
mod runtime;

pub use config::{GateConfig, RuntimeConfig};
pub use cyclic::CyclicRunner;
pub use engine::WorkflowEngine;
pub use executor::{LevelExecutor, RunScope};
pub use lock::{ExclusiveOptions, LockGuard, LockRecord, LockStore, MemoryLockStore, SqliteLockStore, TurnGate};
pub use planner::{build_levels, select_mode, ExecutionMode, ExecutionPlan, Level};
pub use registry::{HandlerMetadata, HandlerTable};
pub use runtime::{RunOptions, TurnRuntime};
