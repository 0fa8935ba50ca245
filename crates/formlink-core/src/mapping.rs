//! Value mapping: turning authored field values (which may hold tags) into
//! the final values an action persists.
//!
//! Everything the mapper needs arrives through `MappingContext`. There is no
//! process-wide substitution state to push or pop around a field read.

use crate::form::Submission;
use crate::resolver::Resolver;
use crate::store::ActionOutputStore;
use crate::types::Fields;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

pub struct MappingContext<'a> {
    pub submission: &'a Submission,
    /// Action whose values are being mapped.
    pub action: &'a str,
    /// Outputs of actions that already ran in this pass.
    pub outputs: Option<&'a ActionOutputStore>,
}

pub trait ValueMapper {
    fn map(&self, raw: &Value, ctx: &MappingContext<'_>) -> Value;

    fn map_fields(&self, raw: &Fields, ctx: &MappingContext<'_>) -> Fields {
        raw.iter()
            .map(|(k, v)| (k.clone(), self.map(v, ctx)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Verbatim
// ---------------------------------------------------------------------------

/// Identity mapper for hosts that substitute values before calling in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbatim;

impl ValueMapper for Verbatim {
    fn map(&self, raw: &Value, _ctx: &MappingContext<'_>) -> Value {
        raw.clone()
    }
}

// ---------------------------------------------------------------------------
// FieldTagMapper
// ---------------------------------------------------------------------------

/// Replaces `{field:<name>}` with a submitted value and
/// `{action:<name>:<field>}` with a field of another action's output.
///
/// A value that is exactly one tag becomes the referenced JSON value as-is;
/// tags embedded in longer text are interpolated as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldTagMapper;

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(field|action):([A-Za-z0-9_\-.]+)(?::([A-Za-z0-9_\-.]+))?\}")
            .unwrap()
    })
}

impl FieldTagMapper {
    fn lookup(&self, caps: &Captures<'_>, ctx: &MappingContext<'_>) -> Value {
        let name = &caps[2];
        match &caps[1] {
            "field" => ctx.submission.get(name).cloned().unwrap_or(Value::Null),
            _ => {
                let field = caps.get(3).map_or("id", |m| m.as_str());
                ctx.outputs
                    .and_then(|store| Resolver::new(store).field(name, field))
                    .unwrap_or(Value::Null)
            }
        }
    }

    fn map_str(&self, s: &str, ctx: &MappingContext<'_>) -> Value {
        let re = tag_pattern();
        if let Some(m) = re.find(s) {
            if m.start() == 0 && m.end() == s.len() {
                if let Some(caps) = re.captures(s) {
                    return self.lookup(&caps, ctx);
                }
            }
        } else {
            return Value::String(s.to_string());
        }
        let replaced = re.replace_all(s, |caps: &Captures<'_>| as_text(&self.lookup(caps, ctx)));
        Value::String(replaced.into_owned())
    }
}

impl ValueMapper for FieldTagMapper {
    fn map(&self, raw: &Value, ctx: &MappingContext<'_>) -> Value {
        match raw {
            Value::String(s) => self.map_str(s, ctx),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.map(v, ctx)).collect()),
            Value::Object(obj) => Value::Object(self.map_fields(obj, ctx)),
            other => other.clone(),
        }
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Truthiness of a mapped gate or flag value.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

/// Null, blank strings and empty arrays count as "no value supplied".
pub fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Actions an authored value reads from through `{action:..}` tags.
pub fn referenced_actions(raw: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_action_refs(raw, &mut names);
    names
}

fn collect_action_refs(raw: &Value, names: &mut Vec<String>) {
    match raw {
        Value::String(s) => {
            for caps in tag_pattern().captures_iter(s) {
                if &caps[1] == "action" && !names.iter().any(|n| n == &caps[2]) {
                    names.push(caps[2].to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_action_refs(v, names)),
        Value::Object(obj) => obj.values().for_each(|v| collect_action_refs(v, names)),
        _ => {}
    }
}

/// Interpret a mapped value as an entity id.
pub fn as_entity_id(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
