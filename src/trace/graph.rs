//! The per-forward trace graph.
//!
//! Built fresh for every traced forward call. Nodes are either parameter
//! references or generator-output value nodes; edges record "this output was
//! produced using parameter X, rendered as context C". Node ids are
//! append-only indices and edges may only point at existing nodes, so the
//! graph is acyclic by construction — pipelines with feedback loops must be
//! unrolled into distinct nodes per iteration.

use crate::core::{ParamId, Parameter};
use std::sync::Arc;

#[derive(Clone)]
pub enum NodeKind {
    /// A parameter read during forward. Holds a reference, not a copy; the
    /// backward pass appends feedback through it.
    Param(Arc<Parameter>),
    /// A value produced by a generator.
    Output {
        generator: String,
        raw: String,
        parse_ok: bool,
    },
}

#[derive(Clone)]
pub struct Node {
    pub id: usize,
    pub kind: NodeKind,
    /// Upstream value nodes this node consumed (empty for parameter nodes).
    pub inputs: Vec<usize>,
}

/// A parameter-to-output edge tagged with the exact rendered prompt, so
/// backward can explain how the rendering shaped the output.
#[derive(Clone)]
pub struct Edge {
    pub param_node: usize,
    pub output_node: usize,
    pub context: String,
}

#[derive(Default, Clone)]
pub struct TraceGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl TraceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter read, reusing the node if this parameter already
    /// appears in the graph. Multiple uses become multiple edges, not
    /// duplicate nodes.
    pub fn add_param_node(&mut self, param: Arc<Parameter>) -> usize {
        let id = param.id();
        if let Some(existing) = self.find_param_node(id) {
            return existing;
        }
        let node_id = self.nodes.len();
        self.nodes.push(Node {
            id: node_id,
            kind: NodeKind::Param(param),
            inputs: vec![],
        });
        node_id
    }

    /// Register a generator output with the upstream output nodes it
    /// consumed. Fan-out siblings pass the same inputs; a fan-in node passes
    /// every sibling.
    pub fn add_output_node(
        &mut self,
        generator: &str,
        raw: &str,
        parse_ok: bool,
        inputs: Vec<usize>,
    ) -> usize {
        let node_id = self.nodes.len();
        debug_assert!(inputs.iter().all(|&i| i < node_id));
        self.nodes.push(Node {
            id: node_id,
            kind: NodeKind::Output {
                generator: generator.to_string(),
                raw: raw.to_string(),
                parse_ok,
            },
            inputs,
        });
        node_id
    }

    pub fn add_edge(&mut self, param_node: usize, output_node: usize, context: String) {
        debug_assert!(param_node < self.nodes.len() && output_node < self.nodes.len());
        self.edges.push(Edge {
            param_node,
            output_node,
            context,
        });
    }

    pub fn find_param_node(&self, id: ParamId) -> Option<usize> {
        self.nodes.iter().position(
            |n| matches!(&n.kind, NodeKind::Param(p) if p.id() == id),
        )
    }

    /// The final output node of the traced forward pass, where backward
    /// seeds the evaluation feedback. Ids only ever append, so the last
    /// output node recorded is the last one produced.
    pub fn final_output(&self) -> Option<usize> {
        self.nodes
            .iter()
            .rev()
            .find(|n| matches!(n.kind, NodeKind::Output { .. }))
            .map(|n| n.id)
    }

    /// Parameter edges feeding one output node.
    pub fn param_edges_into(&self, output_node: usize) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(move |e| e.output_node == output_node)
    }

    pub fn param_of(&self, node: usize) -> Option<&Arc<Parameter>> {
        match &self.nodes.get(node)?.kind {
            NodeKind::Param(p) => Some(p),
            _ => None,
        }
    }

    /// Output nodes in reverse construction order, which is a reverse
    /// topological order because ids only ever append.
    pub fn outputs_reversed(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .rev()
            .filter(|n| matches!(n.kind, NodeKind::Output { .. }))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
