//! Textual gradients: the backward engine and the graph walk that applies it.
//!
//! The engine is itself a generator with a fixed critique template. Backward
//! starts from the final output node seeded with the caller's evaluation
//! feedback and walks output nodes in reverse, turning "how this output
//! should change" into "how each parameter used here should change",
//! appending every synthesized text to the parameter's accumulator.
//! A failed critique call drops that single edge with a warning; it never
//! aborts the pass.

use crate::core::{Feedback, Generator, ModelClient, Prompt};
use crate::data::Example;
use crate::error::{GradError, Result};
use crate::parse::TextParser;
use crate::retry::RetryPolicy;
use crate::trace::TraceGraph;
use std::collections::HashMap;
use std::sync::Arc;

const CRITIQUE_TEMPLATE: &str = "\
You are reviewing one step of an LLM pipeline to improve a trainable value.

The trainable value plays the role of: {{role}}
Its current content is:
{{value}}

It was used in this rendered prompt:
{{context}}

The step produced this output:
{{output}}

Feedback on what should change downstream:
{{downstream}}

Explain concisely what is wrong with the current content of this value and \
how it should change so the output improves. Address only this value, not \
the rest of the pipeline.";

/// Everything the engine needs to critique one parameter use.
pub struct FeedbackRequest<'a> {
    pub role: &'a str,
    pub value: String,
    pub context: &'a str,
    pub output: &'a str,
    pub downstream: &'a str,
}

/// A generator specialized for feedback synthesis.
pub struct BackwardEngine {
    generator: Generator,
}

impl BackwardEngine {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self::with_retry(client, RetryPolicy::default())
    }

    pub fn with_retry(client: Arc<dyn ModelClient>, retry: RetryPolicy) -> Self {
        let generator = Generator::builder()
            .name("backward_engine")
            .template(Prompt::new(CRITIQUE_TEMPLATE))
            .client(client)
            .parser(Arc::new(TextParser))
            .call_retry(retry)
            .max_parse_attempts(1)
            .temperature(0.7)
            .build();
        Self { generator }
    }

    /// Synthesize one feedback text. The critique call runs outside any
    /// trace scope: the engine does not train itself.
    pub async fn compute_feedback(&self, request: FeedbackRequest<'_>) -> Result<String> {
        let mut input = Example::default();
        input.insert("role", request.role);
        input.insert("value", request.value.clone());
        input.insert("context", truncate(request.context, 4000));
        input.insert("output", truncate(request.output, 4000));
        input.insert("downstream", request.downstream);

        let output = self
            .generator
            .generate(&input)
            .await
            .map_err(|e| GradError::FeedbackSynthesis(e.to_string()))?;

        match output.value().and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(GradError::FeedbackSynthesis(
                "engine returned empty critique".into(),
            )),
        }
    }
}

/// Counts reported back to the batch summary.
#[derive(Debug, Default, Clone)]
pub struct BackwardReport {
    pub edges_processed: usize,
    pub feedback_appended: usize,
    pub dropped: usize,
}

/// Propagate `seed_feedback` through one trace graph.
///
/// Output nodes are visited in reverse construction order. Each node's
/// downstream feedback is the seed (for the final node) plus whatever its
/// successors propagated to it; each parameter edge into the node gets an
/// independent engine call and an independent accumulator append — no
/// merging, aggregation is the optimizer's job.
pub async fn backward(
    graph: &TraceGraph,
    seed_feedback: &str,
    engine: &BackwardEngine,
) -> BackwardReport {
    let mut report = BackwardReport::default();
    let Some(final_node) = graph.final_output() else {
        return report;
    };

    let mut downstream: HashMap<usize, Vec<String>> = HashMap::new();
    downstream.insert(final_node, vec![seed_feedback.to_string()]);

    let nodes: Vec<_> = graph.outputs_reversed().cloned().collect();
    for node in nodes {
        let Some(texts) = downstream.get(&node.id).cloned() else {
            continue;
        };
        let joined = texts.join("\n");
        let (raw, _parse_ok) = match &node.kind {
            crate::trace::NodeKind::Output { raw, parse_ok, .. } => (raw.clone(), *parse_ok),
            _ => continue,
        };

        for edge in graph.param_edges_into(node.id) {
            let Some(param) = graph.param_of(edge.param_node) else {
                continue;
            };
            if !param.trainable() {
                continue;
            }
            report.edges_processed += 1;

            let request = FeedbackRequest {
                role: param.role(),
                value: param.value_text(),
                context: &edge.context,
                output: &raw,
                downstream: &joined,
            };
            match engine.compute_feedback(request).await {
                Ok(text) => {
                    param.append_feedback(Feedback {
                        context: edge.context.clone(),
                        text,
                    });
                    report.feedback_appended += 1;
                }
                Err(err) => {
                    report.dropped += 1;
                    tracing::warn!(
                        param = %param.id(),
                        role = param.role(),
                        error = %err,
                        "dropping feedback edge"
                    );
                }
            }
        }

        // Predecessors inherit this node's downstream feedback; the engine
        // re-contextualizes it per parameter when it gets there.
        for input in &node.inputs {
            downstream.entry(*input).or_default().push(joined.clone());
        }
    }

    report
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n[... truncated]")
}
