//! The training loop: concurrent forward/backward over a batch, one
//! optimizer step at the barrier.
//!
//! Scheduling model:
//! - forward passes over independent examples run concurrently, bounded by
//!   `max_concurrency`; each builds its own trace graph even though the
//!   passes share parameters
//! - each example's backward runs in the same task as its forward; appends
//!   to shared accumulators are serialized per parameter
//! - the optimizer step is the one serial point and only runs after every
//!   task has joined
//! - cancellation discards the batch's partial accumulators instead of
//!   feeding them to the optimizer

use crate::core::{Component, GeneratorOutput, LmUsage, Mode, ParamSet, PipelineStats};
use crate::data::{Example, FeedbackMetric};
use crate::error::{GradError, Result};
use crate::grad::{BackwardEngine, backward};
use crate::optim::{Optimizer, StepReport};
use crate::trace::traced;
use bon::Builder;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Caller-supplied scoring over a pipeline's final output. The feedback text
/// seeds backward; return [`FeedbackMetric::correct`] to skip backward for
/// an example.
pub type EvalSignal = Arc<dyn Fn(&Example, &GeneratorOutput) -> FeedbackMetric + Send + Sync>;

/// What happened during one batch, for logging and for tests.
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub examples: usize,
    /// Examples whose forward pass errored (isolated, not fatal to a batch).
    pub examples_failed: usize,
    /// Extra model calls beyond the first, across transient retries.
    pub call_retries: u32,
    /// Whole-call resubmissions after parse failures.
    pub parse_retries: u32,
    /// Outputs that exhausted parse retries and were scored parse-failed.
    pub parse_failures: usize,
    /// Feedback edges dropped because critique synthesis failed.
    pub dropped_feedback: usize,
    pub feedback_appended: usize,
    pub mean_score: f32,
    pub usage: LmUsage,
    pub step: StepReport,
}

#[derive(Builder)]
pub struct Trainer {
    engine: Arc<BackwardEngine>,
    optimizer: Arc<dyn Optimizer>,
    #[builder(default = 8)]
    max_concurrency: usize,
}

struct ExampleOutcome {
    score: f32,
    failed: bool,
    /// Retry and failure counters summed over every stage of the pipeline.
    stats: PipelineStats,
    dropped_feedback: usize,
    feedback_appended: usize,
    usage: LmUsage,
}

impl Trainer {
    /// One training batch: forward + backward per example concurrently, then
    /// a single optimizer step over the pipeline's parameters.
    pub async fn run_batch(
        &self,
        pipeline: Arc<dyn Component>,
        batch: &[Example],
        signal: EvalSignal,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        pipeline.set_mode(Mode::Train);
        let params = ParamSet::from_component(pipeline.as_ref());
        let total = batch.len();

        let outcomes: Vec<Option<ExampleOutcome>> = stream::iter(batch.iter().cloned())
            .map(|example| {
                let pipeline = pipeline.clone();
                let signal = signal.clone();
                let engine = self.engine.clone();
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        outcome = Self::run_example(pipeline, example, signal, engine) => {
                            Some(outcome)
                        }
                    }
                }
            })
            .buffer_unordered(self.max_concurrency.max(1))
            .collect()
            .await;

        // The collect above is the synchronization barrier: every forward
        // and backward task has joined before the optimizer may observe the
        // accumulators.
        if cancel.is_cancelled() {
            params.discard_feedback();
            let completed = outcomes.iter().flatten().count();
            return Err(GradError::Cancelled { completed, total });
        }

        let mut summary = BatchSummary {
            examples: total,
            ..Default::default()
        };
        let mut score_sum = 0.0;
        let mut scored = 0usize;
        for outcome in outcomes.into_iter().flatten() {
            if outcome.failed {
                summary.examples_failed += 1;
                continue;
            }
            score_sum += outcome.score;
            scored += 1;
            summary.call_retries += outcome.stats.call_retries;
            summary.parse_retries += outcome.stats.parse_retries;
            summary.parse_failures += outcome.stats.parse_failures as usize;
            summary.dropped_feedback += outcome.dropped_feedback;
            summary.feedback_appended += outcome.feedback_appended;
            summary.usage = summary.usage + outcome.usage;
        }
        summary.mean_score = if scored > 0 {
            score_sum / scored as f32
        } else {
            0.0
        };

        summary.step = self.optimizer.step(&params).await?;

        tracing::debug!(
            examples = summary.examples,
            failed = summary.examples_failed,
            call_retries = summary.call_retries,
            parse_failures = summary.parse_failures,
            dropped_feedback = summary.dropped_feedback,
            updated = summary.step.updated,
            mean_score = summary.mean_score,
            "batch complete"
        );
        Ok(summary)
    }

    async fn run_example(
        pipeline: Arc<dyn Component>,
        example: Example,
        signal: EvalSignal,
        engine: Arc<BackwardEngine>,
    ) -> ExampleOutcome {
        let (result, graph) = traced(|| {
            let inputs = example.inputs();
            let pipeline = pipeline.clone();
            async move { pipeline.forward(inputs).await }
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(error = %err, "example forward failed, isolating");
                return ExampleOutcome {
                    score: 0.0,
                    failed: true,
                    stats: PipelineStats::default(),
                    dropped_feedback: 0,
                    feedback_appended: 0,
                    usage: LmUsage::default(),
                };
            }
        };

        let metric = signal(&example, &output);
        let report = if metric.has_feedback() {
            Some(backward(&graph, &metric.feedback, engine.as_ref()).await)
        } else {
            None
        };

        ExampleOutcome {
            score: metric.score,
            failed: false,
            stats: output.stats,
            dropped_feedback: report.as_ref().map(|r| r.dropped).unwrap_or(0),
            feedback_appended: report.as_ref().map(|r| r.feedback_appended).unwrap_or(0),
            usage: output.usage,
        }
    }

    /// Mean score over a set of examples with no tracing and no gradient
    /// flow. Used for held-out validation between batches.
    pub async fn evaluate(
        &self,
        pipeline: Arc<dyn Component>,
        examples: &[Example],
        signal: EvalSignal,
    ) -> f32 {
        pipeline.set_mode(Mode::Eval);
        let scores: Vec<f32> = stream::iter(examples.iter().cloned())
            .map(|example| {
                let pipeline = pipeline.clone();
                let signal = signal.clone();
                async move {
                    match pipeline.forward(example.inputs()).await {
                        Ok(output) => signal(&example, &output).score,
                        Err(_) => 0.0,
                    }
                }
            })
            .buffer_unordered(self.max_concurrency.max(1))
            .collect()
            .await;

        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        }
    }
}
