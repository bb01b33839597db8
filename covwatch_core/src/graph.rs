use serde::{Deserialize, Serialize};

/// One coverage-trackable point of a [`StructureGraph`].
///
/// A node is identified solely by its position in [`StructureGraph::nodes`].
/// Adjacency is carried on the wire but never interpreted by the tracker.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GraphNode {
    pub predecessors: Vec<u64>,
    pub successors: Vec<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GraphFunction {
    pub name: String,
    pub node_indices: Vec<u64>,
}

/// The control-flow/structure graph coverage is measured over.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StructureGraph {
    pub nodes: Vec<GraphNode>,
    pub functions: Vec<GraphFunction>,
}

impl StructureGraph {
    /// A graph of `len` nodes with no edges and no functions.
    pub fn with_nodes(len: usize) -> Self {
        Self {
            nodes: vec![GraphNode::default(); len],
            functions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
