//! The polymorphic pipeline stage.
//!
//! Anything that can run forward is a [`Component`]: generators, retrievers,
//! pure data transforms, and the composite containers below. Trainable
//! components expose their parameters through [`Component::parameters`],
//! which composite containers aggregate recursively so an optimizer can
//! enumerate every trainable value in a pipeline from its root.

use crate::core::generator::GeneratorOutput;
use crate::core::parameter::Parameter;
use crate::data::Example;
use crate::error::{GradError, Result};
use crate::trace;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Train records trace edges for every trainable parameter read; eval records
/// nothing and no gradient flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

/// Shared mode flag. Components hold one and containers propagate into their
/// children on `set_mode`.
#[derive(Debug, Default)]
pub struct ModeCell(AtomicBool);

impl ModeCell {
    pub fn new(mode: Mode) -> Self {
        Self(AtomicBool::new(mode == Mode::Train))
    }

    pub fn get(&self) -> Mode {
        if self.0.load(Ordering::Relaxed) {
            Mode::Train
        } else {
            Mode::Eval
        }
    }

    pub fn set(&self, mode: Mode) {
        self.0.store(mode == Mode::Train, Ordering::Relaxed);
    }
}

#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Run this stage over one example. In train mode, inside a traced scope,
    /// the component additionally records its parameter usage into the
    /// current trace graph.
    async fn forward(&self, input: Example) -> Result<GeneratorOutput>;

    /// Every parameter owned by this component and its children. Shared
    /// parameters may appear more than once; [`crate::core::ParamSet`]
    /// deduplicates.
    fn parameters(&self) -> Vec<Arc<Parameter>> {
        vec![]
    }

    fn set_mode(&self, _mode: Mode) {}

    fn mode(&self) -> Mode {
        Mode::Eval
    }
}

/// Runs children in declared order, feeding each child the previous child's
/// output. A child's parsed object becomes the next child's named bindings;
/// any other parsed value is bound under `input`.
pub struct Sequential {
    name: String,
    children: Vec<Arc<dyn Component>>,
}

impl Sequential {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Component>>) -> Result<Self> {
        if children.is_empty() {
            return Err(GradError::Config("Sequential requires at least one child".into()));
        }
        Ok(Self {
            name: name.into(),
            children,
        })
    }
}

#[async_trait]
impl Component for Sequential {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, input: Example) -> Result<GeneratorOutput> {
        let (first, rest) = self
            .children
            .split_first()
            .ok_or_else(|| GradError::Config("Sequential requires at least one child".into()))?;
        let mut output = first.forward(input).await?;
        let mut stats = output.stats;
        let mut usage = output.usage.clone();
        for child in rest {
            let next_input = output.to_example();
            output = child.forward(next_input).await?;
            stats = stats + output.stats;
            usage = usage + output.usage.clone();
        }
        output.stats = stats;
        output.usage = usage;
        Ok(output)
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        self.children
            .iter()
            .flat_map(|c| c.parameters())
            .collect()
    }

    fn set_mode(&self, mode: Mode) {
        for child in &self.children {
            child.set_mode(mode);
        }
    }

    fn mode(&self) -> Mode {
        self.children
            .first()
            .map(|c| c.mode())
            .unwrap_or_default()
    }
}

/// Runs every child on the same input and collects their parsed values into
/// one JSON array, in declared order.
pub struct ComponentList {
    name: String,
    children: Vec<Arc<dyn Component>>,
}

impl ComponentList {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Component>>) -> Result<Self> {
        if children.is_empty() {
            return Err(GradError::Config("ComponentList requires at least one child".into()));
        }
        Ok(Self {
            name: name.into(),
            children,
        })
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Component>> {
        self.children.get(index)
    }
}

#[async_trait]
impl Component for ComponentList {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, input: Example) -> Result<GeneratorOutput> {
        let mut values = Vec::with_capacity(self.children.len());
        let mut usage = crate::core::LmUsage::default();
        let mut stats = crate::core::PipelineStats::default();
        // Every child consumes the same upstream nodes; whatever comes after
        // the fan-out consumes all the children.
        let shared_upstream = trace::upstream_nodes();
        let mut sibling_nodes = Vec::new();
        for child in &self.children {
            trace::set_upstream(shared_upstream.clone());
            let output = child.forward(input.clone()).await?;
            usage = usage + output.usage.clone();
            stats = stats + output.stats;
            sibling_nodes.extend(output.node_id);
            values.push(output.value().cloned().unwrap_or(Value::Null));
        }
        if !sibling_nodes.is_empty() {
            trace::set_upstream(sibling_nodes);
        }
        let mut out = GeneratorOutput::passthrough(&self.name, Value::Array(values), usage);
        out.stats = stats;
        Ok(out)
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        self.children
            .iter()
            .flat_map(|c| c.parameters())
            .collect()
    }

    fn set_mode(&self, mode: Mode) {
        for child in &self.children {
            child.set_mode(mode);
        }
    }

    fn mode(&self) -> Mode {
        self.children
            .first()
            .map(|c| c.mode())
            .unwrap_or_default()
    }
}

/// Wraps a pure function as a non-trainable pipeline stage.
pub struct FnComponent<F> {
    name: String,
    f: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&Example) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Component for FnComponent<F>
where
    F: Fn(&Example) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, input: Example) -> Result<GeneratorOutput> {
        let value = (self.f)(&input)?;
        Ok(GeneratorOutput::passthrough(
            &self.name,
            value,
            crate::core::LmUsage::default(),
        ))
    }
}
