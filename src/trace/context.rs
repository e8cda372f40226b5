//! Task-local trace scope.
//!
//! Trace construction is explicit at the call site — `traced(|| ...)` returns
//! the graph alongside the result — but implicit inside the pipeline, so
//! components compose without threading a context argument. Each concurrent
//! forward pass runs in its own scope and builds its own graph even when the
//! passes share parameters.
//!
//! The scope also tracks the current upstream output nodes. Generators record
//! their node with those as inputs and then become the upstream themselves;
//! fan-out containers reset the set per child so siblings share one upstream
//! instead of chaining off each other.

use crate::core::Parameter;
use crate::trace::TraceGraph;
use std::sync::{Arc, Mutex};
use tokio::task_local;

#[derive(Default)]
struct TraceState {
    graph: TraceGraph,
    upstream: Vec<usize>,
}

task_local! {
    static CURRENT_TRACE: Arc<Mutex<TraceState>>;
}

/// Run `f` with a fresh trace graph in scope and return both the result and
/// the graph the forward pass recorded into it.
pub async fn traced<F, Fut, R>(f: F) -> (R, TraceGraph)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    let state = Arc::new(Mutex::new(TraceState::default()));
    let result = CURRENT_TRACE.scope(state.clone(), f()).await;

    let graph = match Arc::try_unwrap(state) {
        Ok(mutex) => mutex.into_inner().unwrap().graph,
        // A spawned task still holds the state; snapshot what we have.
        Err(arc) => arc.lock().unwrap().graph.clone(),
    };

    (result, graph)
}

/// Whether the current task is inside a `traced` scope (train-mode forward).
pub fn is_tracing() -> bool {
    CURRENT_TRACE.try_with(|_| ()).is_ok()
}

/// The output nodes the next recorded node should consume as inputs. Empty
/// outside a scope or before any output has been recorded.
pub fn upstream_nodes() -> Vec<usize> {
    CURRENT_TRACE
        .try_with(|state| state.lock().unwrap().upstream.clone())
        .unwrap_or_default()
}

/// Replace the upstream set. A generator sets itself after recording; a
/// fan-out container restores the shared upstream per child and then installs
/// the sibling set for whatever consumes the fan-out.
pub fn set_upstream(nodes: Vec<usize>) {
    let _ = CURRENT_TRACE.try_with(|state| {
        state.lock().unwrap().upstream = nodes;
    });
}

pub fn record_param_node(param: Arc<Parameter>) -> Option<usize> {
    CURRENT_TRACE
        .try_with(|state| state.lock().unwrap().graph.add_param_node(param))
        .ok()
}

pub fn record_output_node(
    generator: &str,
    raw: &str,
    parse_ok: bool,
    inputs: Vec<usize>,
) -> Option<usize> {
    CURRENT_TRACE
        .try_with(|state| {
            state
                .lock()
                .unwrap()
                .graph
                .add_output_node(generator, raw, parse_ok, inputs)
        })
        .ok()
}

pub fn record_edge(param_node: usize, output_node: usize, context: String) {
    let _ = CURRENT_TRACE.try_with(|state| {
        state
            .lock()
            .unwrap()
            .graph
            .add_edge(param_node, output_node, context);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_is_scoped_to_the_task() {
        assert!(!is_tracing());
        let ((), graph) = traced(|| async {
            assert!(is_tracing());
            record_output_node("gen", "raw", true, vec![]);
        })
        .await;
        assert!(!is_tracing());
        assert_eq!(graph.nodes.len(), 1);
    }

    #[tokio::test]
    async fn records_outside_scope_are_ignored() {
        assert!(record_output_node("gen", "raw", true, vec![]).is_none());
        assert!(upstream_nodes().is_empty());
        set_upstream(vec![0]);
    }

    #[tokio::test]
    async fn upstream_set_is_scoped() {
        let ((), _graph) = traced(|| async {
            assert!(upstream_nodes().is_empty());
            let node = record_output_node("gen", "raw", true, vec![]).unwrap();
            set_upstream(vec![node]);
            assert_eq!(upstream_nodes(), vec![node]);
        })
        .await;
        assert!(upstream_nodes().is_empty());
    }

    #[tokio::test]
    async fn concurrent_scopes_build_separate_graphs() {
        let (a, b) = tokio::join!(
            traced(|| async {
                record_output_node("gen_a", "a", true, vec![]);
            }),
            traced(|| async {
                record_output_node("gen_b", "b", true, vec![]);
                record_output_node("gen_b", "b2", true, vec![0]);
            }),
        );
        assert_eq!(a.1.nodes.len(), 1);
        assert_eq!(b.1.nodes.len(), 2);
    }
}
