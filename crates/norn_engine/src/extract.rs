//! Parse function calls from plain-text model output.
//!
//! The model signals a call as a JSON object `{"name": ..., "args": {...}}`,
//! ideally wrapped in `<|function_call|>` / `<|end_function_call|>` markers,
//! but in practice it may emit bare JSON, JSON buried in prose, a code fence,
//! or `name(key="value")` syntax. Strategies run in confidence order; the
//! first hit wins, and no hit at all is a normal outcome (narrative text).

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// A function call recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\|function_call\|>(.*?)<\|end_function_call\|>").unwrap()
});

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)```").unwrap());

static CALL_SYNTAX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\s*\(([^)]*)\)").unwrap());

static KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*"([^"]*)""#).unwrap()
});

/// Try each strategy in order and return the first recognized call, or None
/// when the text is plain narrative.
pub fn extract_function_call(text: &str) -> Option<FunctionCall> {
    extract_from_markers(text)
        .or_else(|| extract_whole_json(text))
        .or_else(|| extract_embedded_json(text))
        .or_else(|| extract_code_fence(text))
        .or_else(|| extract_call_syntax(text))
}

/// Remove marker-wrapped call payloads, leaving the surrounding narrative.
pub fn strip_function_calls(text: &str) -> String {
    let stripped = MARKER_RE.replace_all(text, "");
    stripped.trim().to_string()
}

// 1. Marker-wrapped payload.
fn extract_from_markers(text: &str) -> Option<FunctionCall> {
    for caps in MARKER_RE.captures_iter(text) {
        let inner = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Some(call) = parse_call_json(inner) {
            return Some(call);
        }
    }
    None
}

// 2. The whole response is one JSON object.
fn extract_whole_json(text: &str) -> Option<FunctionCall> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return parse_call_json(trimmed);
    }
    None
}

// 3. JSON object embedded in prose, located by brace matching so nested
// objects in args don't truncate the payload at the first inner `}`.
fn extract_embedded_json(text: &str) -> Option<FunctionCall> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        if let Some(candidate) = balanced_object(&text[start..]) {
            if let Some(call) = parse_call_json(candidate) {
                return Some(call);
            }
            search_from = start + candidate.len();
        } else {
            search_from = start + 1;
        }
    }
    None
}

/// The balanced `{...}` slice starting at the first byte, if the braces
/// close. Quote-aware so braces inside string values don't count.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// 4. Code-fenced JSON.
fn extract_code_fence(text: &str) -> Option<FunctionCall> {
    for caps in FENCE_RE.captures_iter(text) {
        let inner = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Some(call) = parse_call_json(inner) {
            return Some(call);
        }
    }
    None
}

// 5. Last resort: name(key="value", ...) syntax.
fn extract_call_syntax(text: &str) -> Option<FunctionCall> {
    for caps in CALL_SYNTAX_RE.captures_iter(text) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        if !known_call_name(name) {
            continue;
        }
        let arg_text = caps.get(2).map_or("", |m| m.as_str());
        let mut args = Map::new();
        for kv in KV_RE.captures_iter(arg_text) {
            let key = kv.get(1).map_or("", |m| m.as_str());
            let value = kv.get(2).map_or("", |m| m.as_str());
            args.insert(key.to_string(), Value::String(value.to_string()));
        }
        return Some(FunctionCall {
            name: name.to_string(),
            args: Value::Object(args),
        });
    }
    None
}

/// The textual-syntax fallback only fires for names the registry exposes;
/// otherwise ordinary prose like "wait(a moment)" would parse as a call.
fn known_call_name(name: &str) -> bool {
    matches!(
        name,
        "start_adventure"
            | "create_character"
            | "update_character"
            | "continue_adventure"
            | "display_profile"
            | "execute_script"
    )
}

/// Accept only objects carrying a string `name`; a missing `args` defaults
/// to an empty mapping.
fn parse_call_json(json_str: &str) -> Option<FunctionCall> {
    let obj: Value = serde_json::from_str(json_str).ok()?;
    let map = obj.as_object()?;
    let name = map.get("name").and_then(|v| v.as_str())?.to_string();
    if name.is_empty() {
        return None;
    }
    let args = map
        .get("args")
        .cloned()
        .unwrap_or(Value::Object(Map::new()));
    Some(FunctionCall { name, args })
}
