use crate::executor::{execute_node, RunScope};
use crate::planner::successor_map;
use crate::registry::HandlerTable;
use chrono::Utc;
use std::collections::HashSet;
use turncore::{ContextSnapshot, ExecutionEvent, FlowError, RunOutcome, SharedContext, Workflow};

/// Runs workflows whose edges form a cycle, such as agents taking turns.
///
/// Each round walks the successor chain from the first node until it comes
/// back to that node. The number of rounds is bounded by the caller and
/// the current round is visible to handlers under `__round`.
pub struct CyclicRunner {
    scope: RunScope,
}

impl CyclicRunner {
    pub fn new(scope: RunScope) -> Self {
        Self { scope }
    }

    pub async fn run(
        &self,
        workflow: &Workflow,
        handlers: &HandlerTable,
        max_rounds: u32,
        initial_context: Option<ContextSnapshot>,
    ) -> Result<RunOutcome, FlowError> {
        let Some(start) = workflow.nodes.first() else {
            return Ok(RunOutcome::default());
        };
        let start_id = start.id.as_str();

        let successors = successor_map(workflow);
        let nodes = workflow.node_index();
        let shared = SharedContext::new(initial_context);
        let mut last_output = None;

        'rounds: for round in 0..max_rounds {
            shared.set_round(round).await;
            tracing::info!(round, "Starting round");
            self.scope.events.emit(ExecutionEvent::RoundStarted {
                run_id: self.scope.run_id,
                round,
                timestamp: Utc::now(),
            });

            let mut visited = HashSet::new();
            let mut current = start_id;
            loop {
                let Some(node) = nodes.get(current) else {
                    tracing::info!(node_id = %current, round, "Chain broken, ending run");
                    break 'rounds;
                };
                if !visited.insert(current) {
                    tracing::warn!(
                        node_id = %current,
                        round,
                        "Chain loops without returning to the start node, ending run"
                    );
                    break 'rounds;
                }

                let handler = handlers.resolve(&node.node_type)?;
                last_output = execute_node(
                    self.scope.clone(),
                    (*node).clone(),
                    handler,
                    shared.clone(),
                )
                .await?;

                match successors.get(current) {
                    Some(next) if next == start_id => break,
                    Some(next) => current = next.as_str(),
                    None => {
                        tracing::info!(node_id = %current, round, "Chain ends without a successor, ending run");
                        break 'rounds;
                    }
                }
            }
        }

        Ok(RunOutcome {
            output: last_output,
            context: shared.snapshot().await,
        })
    }
}
