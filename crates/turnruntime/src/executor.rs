use crate::planner::Level;
use crate::registry::HandlerTable;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use turncore::{
    ContextSnapshot, EventBus, ExecutionEvent, FlowError, Node, NodeContext, NodeHandler, RunId,
    RunOutcome, SharedContext, Workflow,
};

/// Identity and plumbing shared by every node execution of one run
#[derive(Clone)]
pub struct RunScope {
    pub run_id: RunId,
    pub events: EventBus,
    pub cancellation: CancellationToken,
}

impl RunScope {
    pub fn new(events: EventBus) -> Self {
        Self {
            run_id: RunId::new_v4(),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Invoke `handler` for `node` and record its result in the shared context.
pub(crate) async fn execute_node(
    scope: RunScope,
    node: Node,
    handler: Arc<dyn NodeHandler>,
    shared: SharedContext,
) -> Result<Option<Value>, FlowError> {
    scope
        .events
        .node_started(scope.run_id, &node.id, &node.node_type);

    let ctx = NodeContext {
        node_id: node.id.clone(),
        parameters: node.parameters,
        shared: shared.clone(),
        cancellation: scope.cancellation.clone(),
    };

    let start = Instant::now();
    let result = handler.execute(ctx).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(output) => {
            tracing::info!(node_id = %node.id, "Node completed in {}ms", duration_ms);
            scope
                .events
                .node_completed(scope.run_id, &node.id, output.is_some(), duration_ms);
            shared.set_output(&node.id, output.clone()).await;
            Ok(output)
        }
        Err(e) => {
            tracing::error!(node_id = %node.id, "Node failed: {}", e);
            scope.events.node_failed(scope.run_id, &node.id, &e);
            Err(FlowError::Node(e))
        }
    }
}

/// Runs a leveled DAG: levels in sequence, the nodes of a level concurrently.
pub struct LevelExecutor {
    scope: RunScope,
}

impl LevelExecutor {
    pub fn new(scope: RunScope) -> Self {
        Self { scope }
    }

    /// Execute `levels` and return the last produced output with a snapshot
    /// of the shared context.
    ///
    /// A level only starts once every node of the previous level settled.
    /// The first failure of a level, in dispatch order, ends the run.
    pub async fn run(
        &self,
        levels: &[Level],
        workflow: &Workflow,
        handlers: &HandlerTable,
        initial_context: Option<ContextSnapshot>,
    ) -> Result<RunOutcome, FlowError> {
        let shared = SharedContext::new(initial_context);
        let nodes = workflow.node_index();
        let mut last_output = None;

        for (index, level) in levels.iter().enumerate() {
            // Resolve every handler before dispatching anything, so a bad
            // node type aborts the level as a whole.
            let mut batch = Vec::with_capacity(level.len());
            for node_id in level {
                let Some(node) = nodes.get(node_id.as_str()) else {
                    tracing::debug!(node_id = %node_id, "Skipping unknown node");
                    continue;
                };
                let handler = handlers.resolve(&node.node_type)?;
                batch.push(((*node).clone(), handler));
            }

            tracing::info!(level = index, nodes = batch.len(), "Starting level");
            self.scope.events.emit(ExecutionEvent::LevelStarted {
                run_id: self.scope.run_id,
                level: index,
                node_ids: batch.iter().map(|(node, _)| node.id.clone()).collect(),
                timestamp: Utc::now(),
            });

            let tasks: Vec<_> = batch
                .into_iter()
                .map(|(node, handler)| {
                    tokio::spawn(execute_node(
                        self.scope.clone(),
                        node,
                        handler,
                        shared.clone(),
                    ))
                })
                .collect();
            let _abort = AbortOnDrop(tasks.iter().map(|t| t.abort_handle()).collect());
            let settled = join_all(tasks).await;

            let mut failure = None;
            for joined in settled {
                match joined {
                    Ok(Ok(Some(output))) => last_output = Some(output),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        failure.get_or_insert(e);
                    }
                    Err(e) => {
                        failure.get_or_insert(FlowError::Execution(format!(
                            "Task join error: {}",
                            e
                        )));
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }

        Ok(RunOutcome {
            output: last_output,
            context: shared.snapshot().await,
        })
    }
}

/// Aborts the node tasks of a level if the run itself is dropped mid-level.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
