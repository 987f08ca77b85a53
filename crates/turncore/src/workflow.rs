use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

/// Complete workflow definition, as handed to the engine for one run.
///
/// Workflows arrive from storage or from an external planner and are treated
/// as untrusted: missing or malformed `nodes`/`edges` lists deserialize to
/// empty lists instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default = "new_workflow_id")]
    pub id: WorkflowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub nodes: Vec<Node>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub edges: Vec<Edge>,
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub execution_order: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<i64>,
}

fn new_workflow_id() -> WorkflowId {
    Uuid::new_v4().to_string()
}

impl Workflow {
    pub fn new(id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            execution_order: Vec::new(),
            max_rounds: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Append an edge `source -> target`. The edge id is derived from its position.
    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        let id = format!("e{}", self.edges.len() + 1);
        self.edges.push(Edge {
            id,
            source: source.into(),
            target: target.into(),
        });
    }

    pub fn with_execution_order(mut self, steps: Vec<Step>) -> Self {
        self.execution_order = steps;
        self
    }

    pub fn with_max_rounds(mut self, rounds: i64) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Index of node id to node, for repeated lookups during a run.
    /// Agrees with [`Workflow::find_node`]: the first node with an id wins.
    pub fn node_index(&self) -> HashMap<&str, &Node> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            index.entry(node.id.as_str()).or_insert(node);
        }
        index
    }

    /// The round limit, when it is positive.
    pub fn round_limit(&self) -> Option<u32> {
        self.max_rounds
            .filter(|rounds| *rounds > 0)
            .map(|rounds| u32::try_from(rounds).unwrap_or(u32::MAX))
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, alias = "config")]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Position { x, y };
        self
    }
}

/// Directed edge between two nodes. `from`/`to` are accepted for older documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "from")]
    pub source: NodeId,
    #[serde(alias = "to")]
    pub target: NodeId,
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// One entry of an explicit execution order: a single node, or a group that
/// runs concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Node(NodeId),
    Parallel { parallel: Vec<NodeId> },
}

impl Step {
    pub fn node(id: impl Into<NodeId>) -> Self {
        Step::Node(id.into())
    }

    pub fn parallel<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Step::Parallel {
            parallel: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn node_ids(&self) -> &[NodeId] {
        match self {
            Step::Node(id) => std::slice::from_ref(id),
            Step::Parallel { parallel } => parallel,
        }
    }
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let items = match raw {
        Some(serde_json::Value::Array(items)) => items,
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(other) => {
            tracing::warn!(found = %other, "Expected a list in workflow definition, using an empty one");
            return Ok(Vec::new());
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Dropping malformed workflow entry: {}", e);
                None
            }
        })
        .collect())
}
