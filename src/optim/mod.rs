//! Optimizers: turn accumulated textual feedback into new parameter values.

mod textgrad;

pub use textgrad::{ParamRevision, SelectionPolicy, TextGradDescent};

use crate::core::ParamSet;
use crate::error::Result;
use async_trait::async_trait;

/// Outcome of one optimizer step.
#[derive(Debug, Default, Clone)]
pub struct StepReport {
    /// Parameters that received a new committed value.
    pub updated: usize,
    /// Parameters whose candidates were all discarded (no improvement, or
    /// rewrite failure). Their accumulators are still cleared.
    pub discarded: usize,
    /// Parameters skipped: not `requires_update`, or empty accumulator.
    pub skipped: usize,
}

/// Invoked once per training batch, after every forward and backward task
/// has joined. Must leave every consumed accumulator empty.
#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn step(&self, params: &ParamSet) -> Result<StepReport>;
}
