use crate::config::RuntimeConfig;
use crate::engine::WorkflowEngine;
use crate::lock::{ExclusiveOptions, LockStore, MemoryLockStore, SqliteLockStore, TurnGate};
use crate::registry::HandlerTable;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use turncore::{ContextSnapshot, EventBus, ExecutionEvent, FlowError, RunOutcome, Workflow};

/// Per-turn options for [`TurnRuntime::run_turn_with`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub initial_context: Option<ContextSnapshot>,
    pub cancellation: Option<CancellationToken>,
    /// The caller already holds the row for this key.
    pub already_locked: bool,
}

/// Runs workflows as turns: at most one run per key at a time.
pub struct TurnRuntime {
    handlers: Arc<HandlerTable>,
    engine: WorkflowEngine,
    gate: TurnGate,
    event_bus: EventBus,
}

impl TurnRuntime {
    /// Create a runtime from configuration, opening the lock database it names.
    pub fn from_config(config: RuntimeConfig, handlers: HandlerTable) -> Result<Self, FlowError> {
        config.validate()?;
        let store: Arc<dyn LockStore> = match &config.lock_db {
            Some(path) => Arc::new(SqliteLockStore::open(path)?),
            None => Arc::new(MemoryLockStore::new()),
        };
        Ok(Self::with_store(store, config, handlers))
    }

    /// Create a runtime over an existing lock store
    pub fn with_store(
        store: Arc<dyn LockStore>,
        config: RuntimeConfig,
        handlers: HandlerTable,
    ) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let gate = TurnGate::new(store, config.gate).with_events(event_bus.clone());
        Self {
            handlers: Arc::new(handlers),
            engine: WorkflowEngine::new(event_bus.clone()),
            gate,
            event_bus,
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    pub fn gate(&self) -> &TurnGate {
        &self.gate
    }

    /// Run `workflow` as one turn for `key`.
    pub async fn run_turn(
        &self,
        key: &str,
        workflow: &Workflow,
        initial_context: Option<ContextSnapshot>,
    ) -> Result<RunOutcome, FlowError> {
        self.run_turn_with(
            key,
            workflow,
            RunOptions {
                initial_context,
                ..RunOptions::default()
            },
        )
        .await
    }

    pub async fn run_turn_with(
        &self,
        key: &str,
        workflow: &Workflow,
        options: RunOptions,
    ) -> Result<RunOutcome, FlowError> {
        let engine = match options.cancellation {
            Some(token) => self.engine.clone().with_cancellation(token),
            None => self.engine.clone(),
        };
        let exclusive = ExclusiveOptions {
            already_locked: options.already_locked,
        };

        self.gate
            .run_exclusive_with(
                key,
                exclusive,
                engine.run_workflow(workflow, &self.handlers, options.initial_context),
            )
            .await
    }

    /// Run `workflow` without taking any turn lock.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial_context: Option<ContextSnapshot>,
    ) -> Result<RunOutcome, FlowError> {
        self.engine
            .run_workflow(workflow, &self.handlers, initial_context)
            .await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}
