//! Trainable parameters and the arena that owns them.
//!
//! A [`Parameter`] is a named textual (or otherwise JSON-serializable) value
//! with an append-only feedback accumulator. During a batch the value is
//! read-shared across concurrent forward passes and only the accumulator
//! mutates, under a per-parameter lock; the optimizer is the single writer
//! of the value and runs after the batch barrier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Stable identity for a parameter, valid for the lifetime of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamId(Uuid);

impl ParamId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One accumulated textual gradient: where it came from and what it says.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// The rendered context the parameter was used in when the critiqued
    /// output was produced.
    pub context: String,
    pub text: String,
}

pub struct Parameter {
    id: ParamId,
    /// What this value represents ("system instruction", "demo set", ...).
    /// Fed verbatim to the backward engine and the rewriter.
    role: String,
    trainable: bool,
    requires_update: bool,
    value: RwLock<Option<Value>>,
    accumulator: Mutex<Vec<Feedback>>,
}

impl Parameter {
    pub fn new(role: impl Into<String>, value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: ParamId::new(),
            role: role.into(),
            trainable: true,
            requires_update: true,
            value: RwLock::new(Some(value.into())),
            accumulator: Mutex::new(Vec::new()),
        })
    }

    /// A parameter with no initial value; the optimizer may still fill it in
    /// once feedback arrives.
    pub fn uninitialized(role: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ParamId::new(),
            role: role.into(),
            trainable: true,
            requires_update: true,
            value: RwLock::new(None),
            accumulator: Mutex::new(Vec::new()),
        })
    }

    /// A value that participates in forward passes but is never touched by
    /// backward or the optimizer.
    pub fn frozen(role: impl Into<String>, value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: ParamId::new(),
            role: role.into(),
            trainable: false,
            requires_update: false,
            value: RwLock::new(Some(value.into())),
            accumulator: Mutex::new(Vec::new()),
        })
    }

    /// Trainable in backward, but the optimizer must leave the value alone.
    pub fn observed(role: impl Into<String>, value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: ParamId::new(),
            role: role.into(),
            trainable: true,
            requires_update: false,
            value: RwLock::new(Some(value.into())),
            accumulator: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn requires_update(&self) -> bool {
        self.requires_update
    }

    pub fn value(&self) -> Option<Value> {
        self.value.read().unwrap().clone()
    }

    /// The value rendered as prompt text; empty string when uninitialized.
    pub fn value_text(&self) -> String {
        match &*self.value.read().unwrap() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Single-writer discipline: only the optimizer commits values.
    pub(crate) fn set_value(&self, value: Value) {
        *self.value.write().unwrap() = Some(value);
    }

    /// Append one textual gradient. Safe under concurrent backward passes.
    pub fn append_feedback(&self, feedback: Feedback) {
        if !self.trainable {
            return;
        }
        self.accumulator.lock().unwrap().push(feedback);
    }

    pub fn feedback_len(&self) -> usize {
        self.accumulator.lock().unwrap().len()
    }

    /// Take every accumulated entry, leaving the accumulator empty. Called by
    /// the optimizer at the batch barrier and by batch cancellation.
    pub fn drain_feedback(&self) -> Vec<Feedback> {
        std::mem::take(&mut *self.accumulator.lock().unwrap())
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("trainable", &self.trainable)
            .field("requires_update", &self.requires_update)
            .field("value", &self.value.read().unwrap())
            .field("feedback_len", &self.feedback_len())
            .finish()
    }
}

/// Arena of every parameter in a pipeline, indexed by id. The optimizer and
/// the trainer enumerate parameters through this instead of re-walking the
/// component tree.
#[derive(Default, Clone)]
pub struct ParamSet {
    params: Vec<Arc<Parameter>>,
}

impl ParamSet {
    pub fn new(params: Vec<Arc<Parameter>>) -> Self {
        Self { params }
    }

    /// Collect the parameters of a component tree, deduplicated by id so a
    /// shared parameter appears once.
    pub fn from_component(component: &dyn crate::core::Component) -> Self {
        let mut seen = HashMap::new();
        for param in component.parameters() {
            seen.entry(param.id()).or_insert(param);
        }
        let mut params: Vec<_> = seen.into_values().collect();
        params.sort_by_key(|p| p.id().to_string());
        Self { params }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Parameter>> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, id: ParamId) -> Option<&Arc<Parameter>> {
        self.params.iter().find(|p| p.id() == id)
    }

    /// Discard accumulated feedback on every parameter. Used when a batch is
    /// cancelled: partial accumulators are not a valid update source.
    pub fn discard_feedback(&self) {
        for param in &self.params {
            param.drain_feedback();
        }
    }

    /// Serialize trained values as an id-to-value map for reuse across runs.
    pub fn snapshot(&self) -> HashMap<ParamId, Value> {
        self.params
            .iter()
            .filter_map(|p| p.value().map(|v| (p.id(), v)))
            .collect()
    }

    /// Restore values from a snapshot. Unknown ids are ignored; frozen
    /// parameters are left untouched.
    pub fn restore(&self, snapshot: &HashMap<ParamId, Value>) {
        for param in &self.params {
            if param.requires_update()
                && let Some(value) = snapshot.get(&param.id())
            {
                param.set_value(value.clone());
            }
        }
    }
}
