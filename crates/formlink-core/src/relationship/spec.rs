//! Normalising authored relationship entries into `RelationshipSpec`s.
//!
//! An entry without a related action or without a relationship type
//! contributes nothing. That is an omission, not a validation failure.

use crate::error::{FormlinkError, Result};
use crate::form::{ActionDef, RawRelationshipEntry};
use crate::mapping::{is_truthy, MappingContext, ValueMapper};
use crate::types::{Direction, Fields, RelationshipTypeId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    /// Position of the entry in the action's declaration list.
    pub index: usize,
    pub related_action: String,
    pub relationship_type_id: RelationshipTypeId,
    /// Side the declaring contact occupies.
    pub direction: Direction,
    /// Side the related contact occupies; always `direction.inverse()`.
    pub inverse: Direction,
    /// Mapped relationship attribute values.
    #[serde(default)]
    pub fields: Fields,
    /// Either "is current employee" or "is current employer" was set.
    #[serde(default)]
    pub is_current: bool,
}

impl RelationshipSpec {
    pub fn new(
        index: usize,
        related_action: impl Into<String>,
        relationship_type_id: RelationshipTypeId,
        direction: Direction,
    ) -> Self {
        Self {
            index,
            related_action: related_action.into(),
            relationship_type_id,
            direction,
            inverse: direction.inverse(),
            fields: Fields::new(),
            is_current: false,
        }
    }
}

fn token_pattern() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(r"^\s*(\d+)_(ab|ba|a_b|b_a|equal)\s*$").unwrap())
}

/// Split a `{type_id}_{ab|ba|equal}` token.
pub fn parse_type_token(token: &str) -> Result<(RelationshipTypeId, Direction)> {
    let caps = token_pattern()
        .captures(token)
        .ok_or_else(|| FormlinkError::InvalidRelationshipType(token.to_string()))?;
    let type_id = caps[1]
        .parse()
        .map_err(|_| FormlinkError::InvalidRelationshipType(token.to_string()))?;
    let direction = caps[2].parse()?;
    Ok((type_id, direction))
}

/// Normalise one entry. `None` means the entry is dropped.
pub fn parse_entry(
    index: usize,
    entry: &RawRelationshipEntry,
    mapper: &dyn ValueMapper,
    ctx: &MappingContext<'_>,
) -> Option<RelationshipSpec> {
    let related_action = entry
        .related_action
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let token = entry
        .relationship_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let (type_id, direction) = match parse_type_token(token) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(action = ctx.action, entry = index, error = %e, "dropping relationship entry");
            return None;
        }
    };

    let flag = |v: &Option<serde_json::Value>| {
        v.as_ref().is_some_and(|raw| is_truthy(&mapper.map(raw, ctx)))
    };

    let mut spec = RelationshipSpec::new(index, related_action, type_id, direction);
    spec.fields = mapper.map_fields(&entry.fields, ctx);
    spec.is_current = flag(&entry.is_current_employee) || flag(&entry.is_current_employer);
    Some(spec)
}

/// Every usable relationship declaration of `action`, in declaration order.
pub fn parse_entries(
    action: &ActionDef,
    mapper: &dyn ValueMapper,
    ctx: &MappingContext<'_>,
) -> Vec<RelationshipSpec> {
    action
        .relationships
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| parse_entry(i, entry, mapper, ctx))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::Submission;
    use crate::mapping::{FieldTagMapper, Verbatim};
    use crate::types::ActionKind;
    use serde_json::json;

    fn context<'a>(submission: &'a Submission, action: &'a str) -> MappingContext<'a> {
        MappingContext {
            submission,
            action,
            outputs: None,
        }
    }

    fn entry(related: Option<&str>, token: Option<&str>) -> RawRelationshipEntry {
        RawRelationshipEntry {
            related_action: related.map(String::from),
            relationship_type: token.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn token_parsing() {
        assert_eq!(parse_type_token("1_ab").unwrap(), (1, Direction::Ab));
        assert_eq!(parse_type_token("12_ba").unwrap(), (12, Direction::Ba));
        assert_eq!(parse_type_token("4_equal").unwrap(), (4, Direction::Equal));
        assert!(parse_type_token("ab_1").is_err());
        assert!(parse_type_token("1-ab").is_err());
        assert!(parse_type_token("").is_err());
    }

    #[test]
    fn inverse_follows_direction() {
        let sub = Submission::default();
        let ctx = context(&sub, "child");
        let ab = parse_entry(0, &entry(Some("parent"), Some("1_ab")), &Verbatim, &ctx).unwrap();
        assert_eq!(ab.inverse, Direction::Ba);
        let eq = parse_entry(0, &entry(Some("parent"), Some("3_equal")), &Verbatim, &ctx).unwrap();
        assert_eq!(eq.inverse, Direction::Equal);
    }

    #[test]
    fn incomplete_entries_are_dropped() {
        let sub = Submission::default();
        let ctx = context(&sub, "child");
        assert!(parse_entry(0, &entry(None, Some("1_ab")), &Verbatim, &ctx).is_none());
        assert!(parse_entry(0, &entry(Some(""), Some("1_ab")), &Verbatim, &ctx).is_none());
        assert!(parse_entry(0, &entry(Some("parent"), None), &Verbatim, &ctx).is_none());
        assert!(parse_entry(0, &entry(Some("parent"), Some("bogus")), &Verbatim, &ctx).is_none());
    }

    #[test]
    fn current_flag_from_either_subfield() {
        let Some(values) = json!({"works_here": "1"}).as_object().cloned() else {
            unreachable!()
        };
        let sub = Submission::new(values);
        let ctx = context(&sub, "employee");

        let mut e = entry(Some("org"), Some("5_ab"));
        e.is_current_employee = Some(json!("{field:works_here}"));
        assert!(parse_entry(0, &e, &FieldTagMapper, &ctx).unwrap().is_current);

        let mut e = entry(Some("org"), Some("5_ba"));
        e.is_current_employer = Some(json!(true));
        assert!(parse_entry(0, &e, &FieldTagMapper, &ctx).unwrap().is_current);

        let mut e = entry(Some("org"), Some("5_ab"));
        e.is_current_employee = Some(json!("{field:missing}"));
        assert!(!parse_entry(0, &e, &FieldTagMapper, &ctx).unwrap().is_current);
    }

    #[test]
    fn parse_entries_keeps_declaration_index() {
        let sub = Submission::default();
        let ctx = context(&sub, "child");
        let mut action = ActionDef::new("child", ActionKind::Contact);
        action.relationships = vec![
            entry(Some("parent"), None),
            entry(Some("parent"), Some("1_ab")),
            entry(Some("sibling"), Some("4_equal")),
        ];
        let specs = parse_entries(&action, &Verbatim, &ctx);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].index, 1);
        assert_eq!(specs[1].index, 2);
        assert_eq!(specs[1].related_action, "sibling");
    }

    #[test]
    fn attribute_fields_are_mapped() {
        let Some(values) = json!({"since": "2020-01-01"}).as_object().cloned() else {
            unreachable!()
        };
        let sub = Submission::new(values);
        let ctx = context(&sub, "child");
        let mut e = entry(Some("parent"), Some("1_ab"));
        e.fields.insert("start_date".into(), json!("{field:since}"));
        let spec = parse_entry(0, &e, &FieldTagMapper, &ctx).unwrap();
        assert_eq!(spec.fields["start_date"], json!("2020-01-01"));
    }
}
