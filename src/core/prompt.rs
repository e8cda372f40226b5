//! Prompt templates: `{{placeholder}}` substitution over bound inputs and
//! parameter values. Rendering is pure; the only failure mode is a
//! referenced placeholder with no binding, which is a configuration error.

use crate::error::{GradError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Prompt {
    template: String,
    placeholders: Vec<String>,
}

impl Prompt {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let placeholders = scan_placeholders(&template);
        Self {
            template,
            placeholders,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitute every `{{name}}` with `vars[name]`, tolerating whitespace
    /// inside the braces. A placeholder without a binding fails with
    /// [`GradError::MissingInput`].
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            let name = after[..end].trim();
            if name.is_empty() {
                // `{{}}` is not a placeholder; keep it literal.
                out.push_str(&rest[start..start + end + 4]);
            } else {
                let value = vars
                    .get(name)
                    .ok_or_else(|| GradError::MissingInput(name.to_string()))?;
                out.push_str(value);
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn scan_placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = after[..end].trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    names
}
