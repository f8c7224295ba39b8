//! Response body classification

use reqwest::StatusCode;
use serde_json::{Value, json};

/// Body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Parsed JSON document
    Json(Value),
    /// Non-JSON text, kept verbatim
    Raw(String),
    /// 204 or an empty payload
    Empty,
}

impl ResponseBody {
    /// Classify a response payload
    pub fn from_text(status: StatusCode, text: String) -> Self {
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(text),
        }
    }

    /// JSON view: `{"raw": text}` for raw bodies, `{}` for empty ones
    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Raw(text) => json!({ "raw": text }),
            Self::Empty => json!({}),
        }
    }

    /// Borrow the parsed document, if any
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// True for `Empty`
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Cut an error body down to `max_chars`
pub(crate) fn truncate_body(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...[truncated]")
    } else {
        head
    }
}
