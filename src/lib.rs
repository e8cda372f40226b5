//! promptgrad — trainable LLM pipelines with textual gradients.
//!
//! Pipelines are built from [`Component`]s; a [`Generator`] wires a prompt
//! template, a [`ModelClient`] and a [`Parser`] into one node of a trainable
//! computation graph. A forward pass in train mode records a per-call
//! [`TraceGraph`]; [`backward`] walks it in reverse, asking the
//! [`BackwardEngine`] to synthesize natural-language feedback for every
//! trainable [`Parameter`] used along the way; an [`Optimizer`] such as
//! [`TextGradDescent`] then rewrites parameter values from the accumulated
//! feedback. The [`Trainer`] runs this cycle over batches with bounded
//! concurrency.
//!
//! ```no_run
//! use promptgrad::*;
//! use std::sync::Arc;
//!
//! # async fn demo(client: Arc<dyn ModelClient>) -> promptgrad::Result<()> {
//! let instruction = Parameter::new("system instruction", "Answer concisely.");
//! let qa = Generator::builder()
//!     .name("qa")
//!     .template(Prompt::new("{{instruction}}\n\nQ: {{question}}\nA:"))
//!     .params(vec![("instruction".into(), instruction.clone())])
//!     .client(client.clone())
//!     .parser(Arc::new(IntParser))
//!     .build();
//!
//! let output = qa.generate(&Example::from_input("question", "2+2?")).await?;
//! assert_eq!(output.value(), Some(&serde_json::json!(4)));
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod error;
pub mod grad;
pub mod optim;
pub mod parse;
pub mod retry;
pub mod trace;
pub mod train;

pub use crate::core::{
    Component, ComponentList, Feedback, FnComponent, Generator, GeneratorOutput, LmUsage, Mode,
    ModelClient, ModelError, ModelRequest, ModelResponse, ParamId, ParamSet, Parameter,
    ParseOutcome, PipelineStats, Prompt, Sequential,
};
pub use crate::data::{Example, FeedbackMetric};
pub use crate::error::{GradError, Result};
pub use crate::grad::{BackwardEngine, BackwardReport, FeedbackRequest, backward};
pub use crate::optim::{Optimizer, SelectionPolicy, StepReport, TextGradDescent};
pub use crate::parse::{
    BooleanParser, FloatParser, IntParser, JsonParser, ListParser, ParseError, Parser, TextParser,
};
pub use crate::retry::RetryPolicy;
pub use crate::trace::{TraceGraph, traced};
pub use crate::train::{BatchSummary, EvalSignal, Trainer};
