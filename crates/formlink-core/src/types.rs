use serde::{Deserialize, Serialize};
use std::fmt;

/// CRM primary key. Contacts, relationships and every other entity share it.
pub type EntityId = u64;
pub type ContactId = EntityId;
pub type RelationshipTypeId = u64;

/// Free-form entity or relationship fields, keyed by CRM field name.
pub type Fields = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// Which handler processes an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Contact,
    Activity,
    Case,
    Event,
    Participant,
    Email,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Contact,
            ActionKind::Activity,
            ActionKind::Case,
            ActionKind::Event,
            ActionKind::Participant,
            ActionKind::Email,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Contact => "contact",
            ActionKind::Activity => "activity",
            ActionKind::Case => "case",
            ActionKind::Event => "event",
            ActionKind::Participant => "participant",
            ActionKind::Email => "email",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = crate::error::FormlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::error::FormlinkError::UnknownActionKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which side of a relationship type the declaring contact occupies.
///
/// `Ab` puts the declaring contact on side A and the related contact on
/// side B; `Ba` mirrors that. `Equal` is used for symmetric types where the
/// sides are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ab,
    Ba,
    Equal,
}

impl Direction {
    /// The direction seen from the related contact's side.
    pub fn inverse(self) -> Direction {
        match self {
            Direction::Ab => Direction::Ba,
            Direction::Ba => Direction::Ab,
            Direction::Equal => Direction::Equal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Ab => "ab",
            Direction::Ba => "ba",
            Direction::Equal => "equal",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = crate::error::FormlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ab" | "a_b" => Ok(Direction::Ab),
            "ba" | "b_a" => Ok(Direction::Ba),
            "equal" => Ok(Direction::Equal),
            _ => Err(crate::error::FormlinkError::InvalidDirection(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
