//! The dataflow graph emitted by the compiler, and its JSON wire format.
//!
//! A graph is an append-only array of nodes; a node's identity is its index
//! in that array. Every edge points strictly backwards, so the array is
//! topologically sorted by construction.

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

/// Index of a node within the graph's node array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The synthetic entry node present at index 0 of every graph.
    pub const START: Self = Self(0);
}

/// Operator arguments: an arg name may be appended to more than once, so
/// each name maps to an ordered list of values. Insertion order is kept so
/// serialized output is stable across runs.
pub type Args = IndexMap<String, Vec<String>>;

/// A single operator invocation in the graph.
///
/// Field declaration order is the wire order; downstream tooling diffs the
/// serialized form, so it must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// The operator to run, namespaced as `builtin.<name>` or `model.<name>`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Arguments passed to the operator at execution time.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub args: Args,

    /// The readiness counter the executor decrements as upstream nodes
    /// complete; the node becomes runnable when it reaches zero.
    pub in_degree: usize,

    /// Nodes whose outputs this node consumes.
    #[serde(skip_serializing_if = "SmallVec::is_empty")]
    pub inputs: SmallVec<[NodeId; 2]>,

    /// Nodes that must have executed before this one, without their outputs
    /// being consumed. Used to gate branch arms.
    #[serde(skip_serializing_if = "SmallVec::is_empty")]
    pub dependencies: SmallVec<[NodeId; 2]>,

    /// Marks the node whose output is the graph's response. The front-end
    /// never sets this, but the executor understands it, so the wire format
    /// keeps it.
    #[serde(skip_serializing_if = "is_false")]
    pub is_response: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Node {
    /// A node of the given type with no edges or arguments yet.
    pub fn new(kind: String) -> Self {
        Self {
            kind,
            args: Args::new(),
            in_degree: 0,
            inputs: SmallVec::new(),
            dependencies: SmallVec::new(),
            is_response: false,
        }
    }

    /// The synthetic entry node placed at index 0 of every graph.
    pub fn start() -> Self {
        Self::new("builtin.start".to_owned())
    }
}

/// The graph consists only of nodes; each node has a single output that any
/// later node may consume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Graph {
    /// The node array, indexed by [`NodeId`].
    pub nodes: Vec<Node>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its id.
    ///
    /// The in-degree is fixed here: dependency edges carry the readiness
    /// signal when present, otherwise the data inputs do. Dependencies only
    /// appear on gated branch arms, where the data inputs flow through the
    /// gate and must not double-count it.
    pub fn push(&mut self, mut node: Node) -> NodeId {
        node.in_degree = if node.dependencies.is_empty() {
            node.inputs.len()
        } else {
            node.dependencies.len()
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Get the node at this index
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Return the number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Return whether the graph holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize the graph to the JSON the executor consumes.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize the graph to human-friendly indented JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
