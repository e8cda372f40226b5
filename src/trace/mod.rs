mod context;
mod graph;

pub use context::{
    is_tracing, record_edge, record_output_node, record_param_node, set_upstream, traced,
    upstream_nodes,
};
pub use graph::{Edge, Node, NodeKind, TraceGraph};
