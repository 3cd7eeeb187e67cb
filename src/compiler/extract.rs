//! Pulls a candidate query out of model output.
//!
//! Tried in order:
//! 1. the whole response is a JSON envelope (`query` or `cannot_answer`)
//! 2. the first balanced object after the `JSON_payload` delimiter or a ```json fence
//! 3. the first balanced top-level object anywhere that parses as JSON

use serde_json::{Map, Value};
use thiserror::Error;

/// Delimiter the model is told to place before its JSON block.
pub const PAYLOAD_DELIMITER: &str = "JSON_payload";

const JSON_FENCE: &str = "```json";

/// Errors from [`extract`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("model response was empty")]
    Empty,

    #[error("no JSON object found in model response")]
    NoJsonObject,

    #[error("JSON block after {marker} is not valid JSON: {message}")]
    InvalidJson { marker: String, message: String },

    #[error("JSON object has none of `query`, `cannot_answer` or `fields` (keys: {keys})")]
    UnrecognizedObject { keys: String },
}

/// Which extraction stage matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Envelope,
    Delimited,
    BraceScan,
}

/// What the model produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAnswer {
    /// Unvalidated query payload.
    Query(Value),
    /// The dataset cannot answer the task.
    CannotAnswer(String),
}

/// An extracted answer with the reasoning that accompanied it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub rationale: String,
    pub answer: ModelAnswer,
    pub method: ExtractionMethod,
}

/// Extract the model's answer from raw completion text.
pub fn extract(text: &str) -> Result<Extracted, ExtractionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::Empty);
    }

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(strip_fence(trimmed)) {
        return interpret(object, String::new(), ExtractionMethod::Envelope);
    }

    for marker in [PAYLOAD_DELIMITER, JSON_FENCE] {
        if let Some(found) = delimited(text, marker)? {
            return Ok(found);
        }
    }

    brace_scan(text)
}

/// Body of a response wrapped entirely in a code fence.
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    body.strip_prefix("json").unwrap_or(body).trim()
}

fn delimited(text: &str, marker: &str) -> Result<Option<Extracted>, ExtractionError> {
    let Some(at) = text.find(marker) else {
        return Ok(None);
    };
    let after = at + marker.len();
    let Some(open) = text[after..].find('{').map(|i| after + i) else {
        return Ok(None);
    };
    let Some(close) = balanced_end(text, open) else {
        return Ok(None);
    };

    let rationale = clean_rationale(&text[..at]);
    match serde_json::from_str::<Value>(&text[open..=close]) {
        Ok(Value::Object(object)) => {
            interpret(object, rationale, ExtractionMethod::Delimited).map(Some)
        }
        Ok(_) => Ok(None),
        Err(e) => Err(ExtractionError::InvalidJson {
            marker: marker.to_string(),
            message: e.to_string(),
        }),
    }
}

fn brace_scan(text: &str) -> Result<Extracted, ExtractionError> {
    let mut from = 0;
    while let Some(open) = text[from..].find('{').map(|i| from + i) {
        match balanced_end(text, open) {
            Some(close) => {
                if let Ok(Value::Object(object)) = serde_json::from_str(&text[open..=close]) {
                    let rationale = clean_rationale(&text[..open]);
                    return interpret(object, rationale, ExtractionMethod::BraceScan);
                }
                from = open + 1;
            }
            // An unclosed brace in prose; keep looking past it.
            None => from = open + 1,
        }
    }
    Err(ExtractionError::NoJsonObject)
}

/// Index of the `}` closing the object that opens at `open`.
///
/// Braces inside JSON strings are ignored.
pub fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[open..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn interpret(
    mut object: Map<String, Value>,
    prose: String,
    method: ExtractionMethod,
) -> Result<Extracted, ExtractionError> {
    let rationale = match object.remove("rationale") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => prose,
    };

    let answer = if let Some(reason) = object.get("cannot_answer").filter(|v| !v.is_null()) {
        let reason = reason
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| reason.to_string());
        ModelAnswer::CannotAnswer(reason)
    } else if let Some(query) = object.remove("query") {
        ModelAnswer::Query(query)
    } else if object.contains_key("fields") {
        ModelAnswer::Query(Value::Object(object))
    } else {
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        return Err(ExtractionError::UnrecognizedObject {
            keys: keys.join(", "),
        });
    };

    Ok(Extracted {
        rationale,
        answer,
        method,
    })
}

fn clean_rationale(prose: &str) -> String {
    prose
        .trim()
        .trim_end_matches(JSON_FENCE)
        .trim_end_matches(':')
        .trim()
        .to_string()
}
