//! Request parsing.
//!
//! A raw payload is either plain text or a structured literal (a JSON
//! object, or a dict literal with single-quoted strings) with the fields:
//! - `id`: component identifier
//! - `prompt`: the component's prompt
//! - `invalidate_cache_key`: a cache key to drop before anything runs
//!
//! Parsing never fails: anything that is not a mapping with both `id` and
//! `prompt` is treated as plain text.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::domain::{ParsedRequest, Request};

use super::cache::Cache;
use super::session::{keys, SessionState};

pub const ID_FIELD: &str = "id";
pub const PROMPT_FIELD: &str = "prompt";
pub const INVALIDATE_FIELD: &str = "invalidate_cache_key";

/// Interpret a raw payload
pub fn parse_request(raw: &str) -> ParsedRequest {
    let Some(map) = parse_mapping(raw) else {
        return ParsedRequest {
            request: Request::raw(raw),
            invalidate_key: None,
        };
    };

    let invalidate_key = map
        .get(INVALIDATE_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);

    let component_id = map.get(ID_FIELD).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let prompt = map.get(PROMPT_FIELD).and_then(Value::as_str);

    let request = match (component_id, prompt) {
        (Some(component_id), Some(prompt)) => Request::Structured {
            component_id,
            prompt: prompt.to_string(),
            invalidate_key: invalidate_key.clone(),
        },
        _ => Request::raw(raw),
    };

    ParsedRequest {
        request,
        invalidate_key,
    }
}

/// Parse `raw` and apply its side effects.
///
/// The invalidation runs before this returns, so no cache read later in the
/// same chain can observe the dropped entry.
pub async fn apply_request(raw: &str, state: &SessionState, cache: &Cache) -> ParsedRequest {
    let parsed = parse_request(raw);

    if let Request::Structured {
        component_id,
        prompt,
        ..
    } = &parsed.request
    {
        debug!(component = %component_id, "Recording component prompt");
        state.append(keys::component(component_id), prompt.as_str());
    }

    if let Some(key) = &parsed.invalidate_key {
        match cache.delete(key).await {
            Ok(()) => info!(%key, "Invalidated cache entry"),
            Err(e) => warn!(%key, error = %e, "Cache invalidation failed"),
        }
    }

    parsed
}

fn parse_mapping(raw: &str) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let value = serde_json::from_str::<Value>(trimmed).ok().or_else(|| {
        dict_literal_to_json(trimmed).and_then(|json| serde_json::from_str(&json).ok())
    })?;

    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Rewrite a dict literal (`{'id': 'c1', 'ok': True}`) as JSON.
///
/// Handles single- and double-quoted strings, `True`/`False`/`None`, and
/// trailing commas. Returns `None` on anything else that is not JSON-like.
fn dict_literal_to_json(literal: &str) -> Option<String> {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push('"');
                let quote = c;
                loop {
                    let ch = chars.next()?;
                    match ch {
                        '\\' => {
                            let escaped = chars.next()?;
                            match escaped {
                                '\'' => out.push('\''),
                                '"' => out.push_str("\\\""),
                                other => {
                                    out.push('\\');
                                    out.push(other);
                                }
                            }
                        }
                        '"' if quote == '\'' => out.push_str("\\\""),
                        ch if ch == quote => break,
                        '\n' => out.push_str("\\n"),
                        ch => out.push(ch),
                    }
                }
                out.push('"');
            }
            ',' => {
                let mut lookahead = chars.clone();
                while lookahead.peek().is_some_and(|ch| ch.is_whitespace()) {
                    lookahead.next();
                }
                if !matches!(lookahead.peek(), Some('}') | Some(']')) {
                    out.push(',');
                }
            }
            // Exponent of a numeric literal such as `1e5`
            c @ ('e' | 'E') if out.ends_with(|p: char| p.is_ascii_digit()) => out.push(c),
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_alphanumeric() && next != '_' {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                out.push_str(match word.as_str() {
                    "True" | "true" => "true",
                    "False" | "false" => "false",
                    "None" | "null" => "null",
                    _ => return None,
                });
            }
            c => out.push(c),
        }
    }

    Some(out)
}
