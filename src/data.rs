//! Example and feedback data carried through forward and backward passes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One training or inference example: a bag of named values, with the keys
/// split into inputs (fed to the pipeline) and expected outputs (used only by
/// the caller's evaluation signal).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Example {
    pub data: HashMap<String, Value>,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

impl Example {
    pub fn new(
        data: HashMap<String, Value>,
        input_keys: Vec<String>,
        output_keys: Vec<String>,
    ) -> Self {
        Self {
            data,
            input_keys,
            output_keys,
        }
    }

    /// An example with a single input field and no expected output.
    pub fn from_input(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let mut data = HashMap::new();
        data.insert(key.clone(), value.into());
        Self {
            data,
            input_keys: vec![key],
            output_keys: vec![],
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The value under `key` rendered as plain text. JSON strings lose their
    /// quotes; everything else uses its JSON encoding.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.data.get(key).map(value_to_text)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if !self.input_keys.contains(&key) && !self.output_keys.contains(&key) {
            self.input_keys.push(key.clone());
        }
        self.data.insert(key, value.into());
    }

    /// Only the input portion of the example, for feeding a pipeline without
    /// leaking expected outputs into the prompt.
    pub fn inputs(&self) -> Example {
        let data = self
            .data
            .iter()
            .filter(|(k, _)| self.input_keys.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Example {
            data,
            input_keys: self.input_keys.clone(),
            output_keys: vec![],
        }
    }
}

pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluation result for one example: a score plus the critique text that
/// seeds the backward pass. An empty feedback string means "nothing to fix"
/// and suppresses backward for that example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackMetric {
    /// Typically 0.0 to 1.0, but any range works.
    pub score: f32,
    /// Why the score was assigned, in natural language.
    pub feedback: String,
}

impl FeedbackMetric {
    pub fn new(score: f32, feedback: impl Into<String>) -> Self {
        Self {
            score,
            feedback: feedback.into(),
        }
    }

    /// A perfect score with no critique; backward is skipped for this example.
    pub fn correct() -> Self {
        Self {
            score: 1.0,
            feedback: String::new(),
        }
    }

    pub fn has_feedback(&self) -> bool {
        !self.feedback.is_empty()
    }
}
