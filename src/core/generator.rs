//! The Generator: prompt + model call + parse, as one graph node.
//!
//! Forward renders the template from bound inputs and the current value of
//! every owned parameter, calls the model with bounded transient retries,
//! parses the raw response with bounded whole-call parse retries, and — in
//! train mode inside a traced scope — records one trace edge per parameter
//! read, tagged with the exact rendered prompt.

use crate::core::component::{Component, Mode, ModeCell};
use crate::core::model::{LmUsage, ModelClient, ModelError, ModelRequest};
use crate::core::parameter::Parameter;
use crate::core::prompt::Prompt;
use crate::data::Example;
use crate::error::{GradError, Result};
use crate::parse::Parser;
use crate::retry::RetryPolicy;
use crate::trace;
use async_trait::async_trait;
use bon::Builder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// What came out of the parser.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(Value),
    /// Parse retries were exhausted. The raw text is preserved on the output
    /// so the caller can score it (typically as zero) or inspect it.
    ParseFailed { error: String },
}

/// Retry and failure counters carried on a [`GeneratorOutput`]. A generator
/// fills in its own; containers sum their children's so the counts cover the
/// whole pipeline, not just the final stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// Extra model calls beyond the first, across transient retries.
    pub call_retries: u32,
    /// Whole-call resubmissions after parse failures.
    pub parse_retries: u32,
    /// Outputs that exhausted parse retries anywhere in the pipeline.
    pub parse_failures: u32,
}

impl std::ops::Add for PipelineStats {
    type Output = PipelineStats;

    fn add(self, other: PipelineStats) -> Self {
        PipelineStats {
            call_retries: self.call_retries + other.call_retries,
            parse_retries: self.parse_retries + other.parse_retries,
            parse_failures: self.parse_failures + other.parse_failures,
        }
    }
}

/// The immutable result of one generator forward call.
#[derive(Debug, Clone)]
pub struct GeneratorOutput {
    pub generator: String,
    pub raw: String,
    pub outcome: ParseOutcome,
    /// Summed across upstream stages when containers re-wrap.
    pub usage: LmUsage,
    /// Model calls made by this node, across transient retries and parse
    /// resubmissions.
    pub call_attempts: u32,
    pub parse_attempts: u32,
    /// Cumulative counters for this node and every upstream stage.
    pub stats: PipelineStats,
    /// Trace node this output was recorded as, when produced in train mode.
    pub node_id: Option<usize>,
}

impl GeneratorOutput {
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            ParseOutcome::Parsed(v) => Some(v),
            ParseOutcome::ParseFailed { .. } => None,
        }
    }

    pub fn is_parse_failed(&self) -> bool {
        matches!(self.outcome, ParseOutcome::ParseFailed { .. })
    }

    /// Rebind this output as the next component's input example. Parsed
    /// objects spread into named bindings; any other value binds as `input`.
    pub fn to_example(&self) -> Example {
        match &self.outcome {
            ParseOutcome::Parsed(Value::Object(map)) => {
                let mut ex = Example::default();
                for (k, v) in map {
                    ex.insert(k.clone(), v.clone());
                }
                ex
            }
            ParseOutcome::Parsed(value) => Example::from_input("input", value.clone()),
            ParseOutcome::ParseFailed { .. } => {
                Example::from_input("input", self.raw.clone())
            }
        }
    }

    /// An output for a non-model component (containers, pure transforms).
    pub fn passthrough(name: &str, value: Value, usage: LmUsage) -> Self {
        Self {
            generator: name.to_string(),
            raw: crate::data::value_to_text(&value),
            outcome: ParseOutcome::Parsed(value),
            usage,
            call_attempts: 0,
            parse_attempts: 0,
            stats: PipelineStats::default(),
            node_id: None,
        }
    }
}

#[derive(Builder)]
pub struct Generator {
    #[builder(into)]
    name: String,
    template: Prompt,
    /// (template slot, parameter) pairs rendered into the prompt. The slot
    /// name must match a `{{placeholder}}` in the template.
    #[builder(default)]
    params: Vec<(String, Arc<Parameter>)>,
    client: Arc<dyn ModelClient>,
    parser: Arc<dyn Parser>,
    #[builder(default)]
    call_retry: RetryPolicy,
    /// Whole-call resubmissions when the parser rejects the response.
    #[builder(default = 2)]
    max_parse_attempts: u32,
    #[builder(default = 0.0)]
    temperature: f32,
    /// Per model call, not per forward pass.
    pub call_timeout: Option<Duration>,
    #[builder(default)]
    mode: ModeCell,
}

impl Generator {
    pub fn params(&self) -> &[(String, Arc<Parameter>)] {
        &self.params
    }

    /// Render the request prompt from input bindings and current parameter
    /// values. Pure apart from the parameter reads.
    fn render(&self, input: &Example) -> Result<String> {
        let mut vars: HashMap<String, String> = HashMap::new();
        for key in &input.input_keys {
            if let Some(text) = input.get_text(key) {
                vars.insert(key.clone(), text);
            }
        }
        for (slot, param) in &self.params {
            vars.insert(slot.clone(), param.value_text());
        }
        self.template.render(&vars)
    }

    /// One model call with bounded transient retries and backoff. Request
    /// errors surface immediately.
    async fn call_model(&self, prompt: &str, attempts: &mut u32) -> Result<crate::core::ModelResponse> {
        let request = ModelRequest::new(prompt).with_temperature(self.temperature);
        let max = self.call_retry.max_attempts.max(1);
        let mut last_message = String::new();

        for attempt in 1..=max {
            *attempts += 1;
            let call = self.client.call(&request);
            let result = match self.call_timeout {
                Some(deadline) => match tokio::time::timeout(deadline, call).await {
                    Ok(inner) => inner,
                    Err(_) => {
                        last_message = format!("timed out after {deadline:?}");
                        if attempt < max {
                            let delay = self.call_retry.delay(attempt);
                            tracing::debug!(
                                generator = %self.name,
                                attempt,
                                ?delay,
                                "model call timed out, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }
                },
                None => call.await,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(ModelError::Request(message)) => {
                    return Err(GradError::Request(message));
                }
                Err(ModelError::Transient(message)) => {
                    last_message = message;
                    if attempt < max {
                        let delay = self.call_retry.delay(attempt);
                        tracing::debug!(
                            generator = %self.name,
                            attempt,
                            ?delay,
                            error = %last_message,
                            "transient model failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(GradError::TransientCall {
            attempts: max,
            message: last_message,
        })
    }

    /// Full forward: render, call, parse, trace. Parse failures never error;
    /// they return a parse-failed output once resubmission is exhausted.
    pub async fn generate(&self, input: &Example) -> Result<GeneratorOutput> {
        let rendered = self.render(input)?;
        let max_parse = self.max_parse_attempts.max(1);

        let mut usage = LmUsage::default();
        let mut call_attempts = 0;
        let mut last_raw = String::new();
        let mut last_error = String::new();

        for parse_attempt in 1..=max_parse {
            let prompt = if parse_attempt == 1 {
                rendered.clone()
            } else {
                // Resubmit the whole call with a format clarification.
                format!(
                    "{rendered}\n\nYour previous response could not be parsed ({last_error}). {}",
                    self.parser.format_hint()
                )
            };

            let response = self.call_model(&prompt, &mut call_attempts).await?;
            usage = usage + response.usage;

            match self.parser.parse(&response.text) {
                Ok(value) => {
                    let node_id = self.record_trace(&rendered, &response.text, true);
                    return Ok(GeneratorOutput {
                        generator: self.name.clone(),
                        raw: response.text,
                        outcome: ParseOutcome::Parsed(value),
                        usage,
                        call_attempts,
                        parse_attempts: parse_attempt,
                        stats: PipelineStats {
                            call_retries: call_attempts - parse_attempt,
                            parse_retries: parse_attempt - 1,
                            parse_failures: 0,
                        },
                        node_id,
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        generator = %self.name,
                        parse_attempt,
                        error = %err,
                        "parse failure, resubmitting call"
                    );
                    last_raw = response.text;
                    last_error = err.message;
                }
            }
        }

        let node_id = self.record_trace(&rendered, &last_raw, false);
        Ok(GeneratorOutput {
            generator: self.name.clone(),
            raw: last_raw,
            outcome: ParseOutcome::ParseFailed { error: last_error },
            usage,
            call_attempts,
            parse_attempts: max_parse,
            stats: PipelineStats {
                call_retries: call_attempts - max_parse,
                parse_retries: max_parse - 1,
                parse_failures: 1,
            },
            node_id,
        })
    }

    fn record_trace(&self, rendered: &str, raw: &str, parse_ok: bool) -> Option<usize> {
        if self.mode.get() != Mode::Train || !trace::is_tracing() {
            return None;
        }
        let inputs = trace::upstream_nodes();
        let node_id = trace::record_output_node(&self.name, raw, parse_ok, inputs)?;
        trace::set_upstream(vec![node_id]);
        for (_, param) in &self.params {
            if !param.trainable() {
                continue;
            }
            if let Some(param_node) = trace::record_param_node(param.clone()) {
                trace::record_edge(param_node, node_id, rendered.to_string());
            }
        }
        Some(node_id)
    }
}

#[async_trait]
impl Component for Generator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, input: Example) -> Result<GeneratorOutput> {
        self.generate(&input).await
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        self.params.iter().map(|(_, p)| p.clone()).collect()
    }

    fn set_mode(&self, mode: Mode) {
        self.mode.set(mode);
    }

    fn mode(&self) -> Mode {
        self.mode.get()
    }
}
