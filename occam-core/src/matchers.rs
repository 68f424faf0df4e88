//! Stateless per-message predicates available to checks.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;

static PATTERNS: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);

/// True when `field` is present and its string value equals `value`.
/// Non-string values never match.
pub fn match_eq(msg: &Message, field: &str, value: &str) -> bool {
    matches!(msg.get(field), Some(Value::String(s)) if s == value)
}

/// True when `field` is present and the pattern finds any substring match.
/// Patterns are compiled on first use and cached for the life of the
/// process; an invalid pattern is an error on every call.
pub fn match_regex(msg: &Message, field: &str, pattern: &str) -> Result<bool> {
    let re = compiled(pattern)?;
    Ok(matches!(msg.get(field), Some(Value::String(s)) if re.is_match(s)))
}

fn compiled(pattern: &str) -> Result<Regex> {
    if let Some(re) = PATTERNS.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    PATTERNS.insert(pattern.to_string(), re.clone());
    Ok(re)
}
