//! Greedy textual-gradient descent.
//!
//! For each parameter with pending feedback, a rewriter generator proposes
//! candidate replacement values from the concatenated (bounded) feedback
//! texts. Selection is pluggable: accept the first candidate, or hold a
//! small pool and let a caller-supplied validation score pick the winner.

use crate::core::{Feedback, Generator, ModelClient, ParamId, ParamSet, Parameter, Prompt};
use crate::data::Example;
use crate::error::Result;
use crate::optim::{Optimizer, StepReport};
use crate::parse::TextParser;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use bon::Builder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const REWRITE_TEMPLATE: &str = "\
You are improving a trainable value used inside an LLM pipeline.

The value plays the role of: {{role}}
Its current content is:
{{value}}

Feedback accumulated from reviewing outputs produced with this value:
{{feedback}}

Rewrite the content to address the feedback while preserving what already \
works. Respond with the new content only, no commentary.";

/// How a committed value is chosen when the rewriter proposes candidates.
#[derive(Clone)]
pub enum SelectionPolicy {
    /// Accept the first candidate unconditionally. The default.
    Greedy,
    /// Propose `pool` candidates, score each (and the current value) with the
    /// caller's validation function, commit the best candidate only if it
    /// beats the current value.
    Validated {
        pool: usize,
        score: Arc<dyn Fn(&Value) -> f32 + Send + Sync>,
    },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::Greedy
    }
}

/// One committed (or discarded) revision, kept for rollback and for spotting
/// repeated unproductive edits.
#[derive(Debug, Clone)]
pub struct ParamRevision {
    pub previous: Option<Value>,
    pub committed: Option<Value>,
    pub feedback_digest: String,
}

#[derive(Builder)]
pub struct TextGradDescent {
    client: Arc<dyn ModelClient>,
    #[builder(default)]
    policy: SelectionPolicy,
    #[builder(default)]
    retry: RetryPolicy,
    /// Bound on the concatenated feedback fed to one rewrite call.
    #[builder(default = 8000)]
    max_feedback_chars: usize,
    /// Revisions retained per parameter.
    #[builder(default = 16)]
    max_history: usize,
    #[builder(default = 0.9)]
    temperature: f32,
    #[builder(skip)]
    history: Mutex<HashMap<ParamId, Vec<ParamRevision>>>,
}

impl TextGradDescent {
    fn rewriter(&self) -> Generator {
        Generator::builder()
            .name("textgrad_rewriter")
            .template(Prompt::new(REWRITE_TEMPLATE))
            .client(self.client.clone())
            .parser(Arc::new(TextParser))
            .call_retry(self.retry.clone())
            .max_parse_attempts(1)
            .temperature(self.temperature)
            .build()
    }

    /// Concatenate accumulated feedback, oldest first, bounded in size. When
    /// the bound is hit the newest entries win: they critique the current
    /// value, older ones may critique a value that no longer exists.
    fn digest_feedback(&self, feedback: &[Feedback]) -> String {
        let mut entries: Vec<String> = feedback
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. {}", i + 1, f.text))
            .collect();
        let mut total: usize = entries.iter().map(|e| e.chars().count()).sum();
        while total > self.max_feedback_chars && entries.len() > 1 {
            let removed = entries.remove(0);
            total -= removed.chars().count();
        }
        entries.join("\n")
    }

    async fn propose(&self, param: &Parameter, digest: &str) -> Option<Value> {
        let rewriter = self.rewriter();
        let mut input = Example::default();
        input.insert("role", param.role());
        input.insert("value", param.value_text());
        input.insert("feedback", digest);

        match rewriter.generate(&input).await {
            Ok(output) => output.value().cloned().filter(|v| match v {
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            }),
            Err(err) => {
                tracing::warn!(
                    param = %param.id(),
                    role = param.role(),
                    error = %err,
                    "rewrite call failed, discarding this update"
                );
                None
            }
        }
    }

    async fn select(&self, param: &Parameter, digest: &str) -> Option<Value> {
        match &self.policy {
            SelectionPolicy::Greedy => self.propose(param, digest).await,
            SelectionPolicy::Validated { pool, score } => {
                let mut candidates = Vec::new();
                for _ in 0..(*pool).max(1) {
                    if let Some(candidate) = self.propose(param, digest).await {
                        candidates.push(candidate);
                    }
                }
                let current_score = param.value().map(|v| score(&v)).unwrap_or(f32::MIN);
                let best = candidates
                    .into_iter()
                    .map(|c| (score(&c), c))
                    .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))?;
                (best.0 > current_score).then_some(best.1)
            }
        }
    }

    fn push_history(&self, id: ParamId, revision: ParamRevision) {
        let mut history = self.history.lock().unwrap();
        let entries = history.entry(id).or_default();
        entries.push(revision);
        if entries.len() > self.max_history {
            let excess = entries.len() - self.max_history;
            entries.drain(..excess);
        }
    }

    pub fn history_of(&self, id: ParamId) -> Vec<ParamRevision> {
        self.history
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Optimizer for TextGradDescent {
    async fn step(&self, params: &ParamSet) -> Result<StepReport> {
        let mut report = StepReport::default();

        for param in params.iter() {
            if !param.requires_update() {
                report.skipped += 1;
                continue;
            }
            // Drain up front: the accumulator must be empty after the step
            // whether or not a candidate commits.
            let feedback = param.drain_feedback();
            if feedback.is_empty() {
                report.skipped += 1;
                continue;
            }

            let digest = self.digest_feedback(&feedback);
            let previous = param.value();

            match self.select(param, &digest).await {
                Some(new_value) => {
                    param.set_value(new_value.clone());
                    self.push_history(
                        param.id(),
                        ParamRevision {
                            previous,
                            committed: Some(new_value),
                            feedback_digest: digest,
                        },
                    );
                    report.updated += 1;
                }
                None => {
                    self.push_history(
                        param.id(),
                        ParamRevision {
                            previous,
                            committed: None,
                            feedback_digest: digest,
                        },
                    );
                    report.discarded += 1;
                }
            }
        }

        Ok(report)
    }
}
