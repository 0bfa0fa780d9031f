//! `${path}` placeholder resolution against a JSON document.
//!
//! Paths are dotted key sequences (`data.user.id`). A path resolves only if
//! every intermediate value is an object holding the next key. `null` counts
//! as absent, so a placeholder whose value is `null` is left untouched.

use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Result of walking a dotted path through a JSON document
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Value),
    /// An object along the path does not hold the key
    Missing,
    /// A value along the path is not an object, so it has no keys
    NotAnObject,
}

impl<'a> Lookup<'a> {
    pub fn found(self) -> Option<&'a Value> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([\w.]+)\}").expect("placeholder pattern is valid"))
}

/// Walk `path` key by key through `value`
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Lookup<'a> {
    let mut current = value;
    for key in path.split('.') {
        match current {
            Value::Object(map) => match map.get(key) {
                Some(next) => current = next,
                None => return Lookup::Missing,
            },
            _ => return Lookup::NotAnObject,
        }
    }
    match current {
        Value::Null => Lookup::Missing,
        found => Lookup::Found(found),
    }
}

/// Textual form of a value when spliced into a template.
///
/// Numbers and booleans are written as literals. Everything else is written
/// as JSON, and a bare string loses its enclosing quotes so that
/// `"${token}"` inside a JSON template stays a valid string.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => {
            let quoted = value.to_string();
            quoted[1..quoted.len() - 1].to_string()
        }
        other => other.to_string(),
    }
}

/// Replace every resolvable `${path}` in `text` with the value at `path` in
/// `context`. Unresolvable placeholders are kept verbatim.
pub fn substitute<'t>(text: &'t str, context: &Value) -> Cow<'t, str> {
    placeholder_pattern().replace_all(text, |caps: &Captures| {
        match extract_path(context, &caps[1]).found() {
            Some(value) => render_value(value),
            None => caps[0].to_string(),
        }
    })
}
