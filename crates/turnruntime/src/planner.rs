//! Turns a workflow definition into an executable plan.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use turncore::{NodeId, Workflow};

/// Node ids that run concurrently within one pass.
pub type Level = Vec<NodeId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    Dag,
    Cyclic { max_rounds: u32 },
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Dag => "dag",
            ExecutionMode::Cyclic { .. } => "cyclic",
        }
    }
}

/// Cyclic mode needs both an edge and a positive round limit; everything
/// else runs as a leveled DAG, edges or not.
pub fn select_mode(workflow: &Workflow) -> ExecutionMode {
    match workflow.round_limit() {
        Some(max_rounds) if !workflow.edges.is_empty() => ExecutionMode::Cyclic { max_rounds },
        _ => ExecutionMode::Dag,
    }
}

/// Build the ordered levels of a DAG run.
///
/// An explicit execution order comes from an external planner and may name
/// nodes that no longer exist. Those ids are dropped, and a step left with
/// no ids disappears. Without an explicit order every node gets its own
/// level in array order.
pub fn build_levels(workflow: &Workflow) -> Vec<Level> {
    if workflow.execution_order.is_empty() {
        return workflow.nodes.iter().map(|n| vec![n.id.clone()]).collect();
    }

    let live: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    workflow
        .execution_order
        .iter()
        .filter_map(|step| {
            let mut seen = HashSet::new();
            let level: Level = step
                .node_ids()
                .iter()
                .filter(|id| live.contains(id.as_str()) && seen.insert(id.as_str()))
                .cloned()
                .collect();
            (!level.is_empty()).then_some(level)
        })
        .collect()
}

/// Execution-order ids that do not name a node of the workflow.
pub fn dropped_order_ids(workflow: &Workflow) -> Vec<NodeId> {
    let live: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    workflow
        .execution_order
        .iter()
        .flat_map(|step| step.node_ids())
        .filter(|id| !live.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Successor of each node along the edges. Only the first outgoing edge of a
/// source counts; later edges from the same source are ignored.
pub fn successor_map(workflow: &Workflow) -> HashMap<NodeId, NodeId> {
    let mut successors = HashMap::new();
    for edge in &workflow.edges {
        successors
            .entry(edge.source.clone())
            .or_insert_with(|| edge.target.clone());
    }
    successors
}

/// Node ids one round of a cyclic run visits, in order, starting at the
/// first node. Stops at a broken link, on returning to the start, or when
/// the walk would revisit a node.
pub fn cyclic_chain(workflow: &Workflow) -> Vec<NodeId> {
    let Some(start) = workflow.nodes.first() else {
        return Vec::new();
    };
    let successors = successor_map(workflow);
    let live: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();

    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(start.id.clone());
    while let Some(id) = current {
        if !live.contains(id.as_str()) || !seen.insert(id.clone()) {
            break;
        }
        current = successors.get(&id).cloned();
        chain.push(id);
    }
    chain
}

/// Whether the edges between existing nodes contain a cycle.
pub fn has_edge_cycle(workflow: &Workflow) -> bool {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for node in &workflow.nodes {
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in &workflow.edges {
        if let (Some(from), Some(to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            graph.add_edge(*from, *to, ());
        }
    }
    is_cyclic_directed(&graph)
}

/// Human-facing description of how a workflow will run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    #[serde(flatten)]
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<Level>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<NodeId>,
}

pub fn plan(workflow: &Workflow) -> ExecutionPlan {
    let mode = select_mode(workflow);
    match mode {
        ExecutionMode::Dag => ExecutionPlan {
            mode,
            levels: build_levels(workflow),
            chain: Vec::new(),
        },
        ExecutionMode::Cyclic { .. } => ExecutionPlan {
            mode,
            levels: Vec::new(),
            chain: cyclic_chain(workflow),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turncore::{Node, Step};

    fn workflow_with(ids: &[&str]) -> Workflow {
        let mut workflow = Workflow::new("wf");
        for id in ids {
            workflow.add_node(Node::new(*id, "agent"));
        }
        workflow
    }

    #[test]
    fn explicit_order_with_parallel_group() {
        let workflow = workflow_with(&["a", "b", "c", "d"]).with_execution_order(vec![
            Step::node("a"),
            Step::parallel(["b", "c"]),
            Step::node("d"),
        ]);

        assert_eq!(
            build_levels(&workflow),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn deleted_ids_are_dropped_from_the_order() {
        let workflow = workflow_with(&["a", "c"]).with_execution_order(vec![
            Step::node("a"),
            Step::node("gone"),
            Step::parallel(["b", "c", "c"]),
        ]);

        assert_eq!(build_levels(&workflow), vec![vec!["a"], vec!["c"]]);
        assert_eq!(dropped_order_ids(&workflow), vec!["gone", "b"]);
    }

    #[test]
    fn without_order_each_node_is_its_own_level() {
        let workflow = workflow_with(&["x", "y", "z"]);
        assert_eq!(build_levels(&workflow), vec![vec!["x"], vec!["y"], vec!["z"]]);
    }

    #[test]
    fn order_that_filters_to_nothing_yields_no_levels() {
        let workflow = workflow_with(&["a"]).with_execution_order(vec![Step::node("b")]);
        assert!(build_levels(&workflow).is_empty());
    }

    #[test]
    fn first_edge_per_source_wins() {
        let mut workflow = workflow_with(&["a", "b", "c"]);
        workflow.connect("a", "b");
        workflow.connect("a", "c");
        workflow.connect("b", "a");

        let successors = successor_map(&workflow);
        assert_eq!(successors["a"], "b");
        assert_eq!(successors["b"], "a");
        assert_eq!(cyclic_chain(&workflow), vec!["a", "b"]);
    }

    #[test]
    fn mode_needs_edges_and_positive_rounds() {
        let mut workflow = workflow_with(&["a", "b"]);
        assert_eq!(select_mode(&workflow), ExecutionMode::Dag);

        workflow.connect("a", "b");
        assert_eq!(select_mode(&workflow), ExecutionMode::Dag);

        let workflow = workflow.with_max_rounds(0);
        assert_eq!(select_mode(&workflow), ExecutionMode::Dag);

        let workflow = workflow.with_max_rounds(3);
        assert_eq!(
            select_mode(&workflow),
            ExecutionMode::Cyclic { max_rounds: 3 }
        );
    }

    #[test]
    fn detects_cycles_between_live_nodes() {
        let mut workflow = workflow_with(&["a", "b"]);
        workflow.connect("a", "b");
        assert!(!has_edge_cycle(&workflow));

        workflow.connect("b", "a");
        assert!(has_edge_cycle(&workflow));

        let mut dangling = workflow_with(&["a"]);
        dangling.connect("a", "ghost");
        dangling.connect("ghost", "a");
        assert!(!has_edge_cycle(&dangling));
    }
}
