use crate::cyclic::CyclicRunner;
use crate::executor::{LevelExecutor, RunScope};
use crate::planner::{build_levels, select_mode, ExecutionMode};
use crate::registry::HandlerTable;
use chrono::Utc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use turncore::{ContextSnapshot, EventBus, ExecutionEvent, FlowError, RunOutcome, Workflow};

/// Chooses the execution mode of a workflow and runs it.
#[derive(Clone)]
pub struct WorkflowEngine {
    events: EventBus,
    cancellation: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            cancellation: CancellationToken::new(),
        }
    }

    /// Hand `cancellation` to every handler of runs started by this engine.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run `workflow` with `handlers`, seeding the shared context from
    /// `initial_context`.
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        handlers: &HandlerTable,
        initial_context: Option<ContextSnapshot>,
    ) -> Result<RunOutcome, FlowError> {
        let scope = RunScope::new(self.events.clone()).with_cancellation(self.cancellation.clone());
        let mode = select_mode(workflow);
        let start_time = Instant::now();

        tracing::info!(
            workflow_id = %workflow.id,
            run_id = %scope.run_id,
            mode = mode.name(),
            "Starting workflow run"
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: scope.run_id,
            workflow_id: workflow.id.clone(),
            mode: mode.name().to_string(),
            timestamp: Utc::now(),
        });

        let run_id = scope.run_id;
        let result = match mode {
            ExecutionMode::Dag => {
                let levels = build_levels(workflow);
                LevelExecutor::new(scope)
                    .run(&levels, workflow, handlers, initial_context)
                    .await
            }
            ExecutionMode::Cyclic { max_rounds } => {
                CyclicRunner::new(scope)
                    .run(workflow, handlers, max_rounds, initial_context)
                    .await
            }
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(run_id = %run_id, "Workflow run completed in {}ms", duration_ms),
            Err(e) => tracing::error!(run_id = %run_id, "Workflow run failed after {}ms: {}", duration_ms, e),
        }
        self.events.emit(ExecutionEvent::RunCompleted {
            run_id,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}
