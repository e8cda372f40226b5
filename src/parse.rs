//! Output parsers: raw model text into structured values.
//!
//! Each parser implements one contract, `parse(&str) -> Result<Value>`. The
//! generator owns retry-on-parse-failure; parsers themselves are pure and
//! report failures through [`ParseError`] carrying the offending text.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// The raw model output that failed to parse.
    pub raw: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, raw: &str) -> Self {
        Self {
            message: message.into(),
            raw: raw.to_string(),
        }
    }
}

pub trait Parser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Value, ParseError>;

    /// One-line description of the expected output shape, appended to the
    /// prompt when a parse retry resubmits the call.
    fn format_hint(&self) -> &str {
        "Respond with plain text."
    }
}

/// Passes the trimmed raw text through unchanged. Used by the backward
/// engine and the optimizer's rewriter, where the output is prose.
#[derive(Default, Clone)]
pub struct TextParser;

impl Parser for TextParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        Ok(Value::String(raw.trim().to_string()))
    }
}

/// Extracts the first integer in the response.
#[derive(Default, Clone)]
pub struct IntParser;

impl Parser for IntParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        let token = first_number_token(raw)
            .ok_or_else(|| ParseError::new("no integer found in output", raw))?;
        let n: i64 = token
            .split('.')
            .next()
            .unwrap_or(&token)
            .parse()
            .map_err(|e| ParseError::new(format!("invalid integer `{token}`: {e}"), raw))?;
        Ok(Value::from(n))
    }

    fn format_hint(&self) -> &str {
        "Respond with a single integer and nothing else."
    }
}

/// Extracts the first number in the response as a float.
#[derive(Default, Clone)]
pub struct FloatParser;

impl Parser for FloatParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        let token = first_number_token(raw)
            .ok_or_else(|| ParseError::new("no number found in output", raw))?;
        let f: f64 = token
            .parse()
            .map_err(|e| ParseError::new(format!("invalid float `{token}`: {e}"), raw))?;
        Ok(Value::from(f))
    }

    fn format_hint(&self) -> &str {
        "Respond with a single number and nothing else."
    }
}

/// Maps yes/no/true/false (case-insensitive, first match wins) to a bool.
#[derive(Default, Clone)]
pub struct BooleanParser;

impl Parser for BooleanParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        let lowered = raw.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphabetic()) {
            match word {
                "true" | "yes" => return Ok(Value::Bool(true)),
                "false" | "no" => return Ok(Value::Bool(false)),
                _ => {}
            }
        }
        Err(ParseError::new("no boolean found in output", raw))
    }

    fn format_hint(&self) -> &str {
        "Respond with `yes` or `no` and nothing else."
    }
}

/// Parses a JSON array, or falls back to one item per non-empty line.
#[derive(Default, Clone)]
pub struct ListParser;

impl Parser for ListParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        if let Some(block) = extract_block(raw, '[', ']')
            && let Ok(value @ Value::Array(_)) = serde_json::from_str::<Value>(block)
        {
            return Ok(value);
        }
        let items: Vec<Value> = raw
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
            .filter(|line| !line.is_empty())
            .map(|line| Value::String(line.to_string()))
            .collect();
        if items.is_empty() {
            return Err(ParseError::new("no list items found in output", raw));
        }
        Ok(Value::Array(items))
    }

    fn format_hint(&self) -> &str {
        "Respond with a JSON array."
    }
}

/// Parses the first JSON object embedded in the response. Tolerates prose
/// around the object, which models routinely produce.
#[derive(Default, Clone)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, raw: &str) -> Result<Value, ParseError> {
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            return Ok(value);
        }
        let block = extract_block(raw, '{', '}')
            .ok_or_else(|| ParseError::new("no JSON object found in output", raw))?;
        serde_json::from_str(block)
            .map_err(|e| ParseError::new(format!("invalid JSON: {e}"), raw))
    }

    fn format_hint(&self) -> &str {
        "Respond with a single valid JSON object."
    }
}

fn first_number_token(raw: &str) -> Option<String> {
    let mut token = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || (c == '-' && chars.peek().is_some_and(|n| n.is_ascii_digit())) {
            token.push(c);
            while let Some(&n) = chars.peek() {
                if n.is_ascii_digit() || (n == '.' && !token.contains('.')) {
                    token.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            return Some(token.trim_end_matches('.').to_string());
        }
    }
    None
}

fn extract_block(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}
