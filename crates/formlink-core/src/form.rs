//! Form definition model: the ordered list of actions a designer authored,
//! and the values a visitor submitted.

use crate::error::{FormlinkError, Result};
use crate::types::{ActionKind, Fields};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// AutoLoad
// ---------------------------------------------------------------------------

/// How a contact action finds an existing contact during the load pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoLoad {
    #[default]
    None,
    /// Load a contact by id. The id may be a mapped value such as `{field:cid}`.
    Contact { id: serde_json::Value },
    /// Adopt the other side of the first relationship declaration that
    /// matches an existing relationship.
    Relationship,
}

// ---------------------------------------------------------------------------
// RawRelationshipEntry
// ---------------------------------------------------------------------------

/// One repeated relationship declaration, as authored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRelationshipEntry {
    /// Name of the action whose contact is the other party.
    #[serde(default)]
    pub related_action: Option<String>,
    /// Compound token `{type_id}_{ab|ba|equal}`.
    #[serde(default)]
    pub relationship_type: Option<String>,
    #[serde(default)]
    pub is_current_employee: Option<serde_json::Value>,
    #[serde(default)]
    pub is_current_employer: Option<serde_json::Value>,
    /// Relationship attribute values, possibly containing mapping tags.
    #[serde(default)]
    pub fields: Fields,
}

// ---------------------------------------------------------------------------
// ActionDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    pub kind: ActionKind,
    /// Gate evaluated after mapping; a falsy value skips the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_type: Option<String>,
    #[serde(default)]
    pub auto_load: AutoLoad,
    /// Entity field mapping, values may contain tags.
    #[serde(default)]
    pub fields: Fields,
    /// Fields whose mapped value must be non-empty for the action to save.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Entity field → name of the action whose produced entity id fills it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RawRelationshipEntry>,
}

impl ActionDef {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            conditional: None,
            contact_type: None,
            auto_load: AutoLoad::None,
            fields: Fields::new(),
            required: Vec::new(),
            references: BTreeMap::new(),
            relationships: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// FormDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

impl FormDefinition {
    pub fn new(name: impl Into<String>, actions: Vec<ActionDef>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let form: FormDefinition = crate::io::read_yaml(path)?;
        form.validate_structure()?;
        Ok(form)
    }

    /// Action names are the keys other actions refer to, so they must be
    /// present and unique.
    pub fn validate_structure(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, action) in self.actions.iter().enumerate() {
            if action.name.trim().is_empty() {
                return Err(FormlinkError::EmptyActionName(i));
            }
            if !seen.insert(action.name.as_str()) {
                return Err(FormlinkError::DuplicateAction(action.name.clone()));
            }
        }
        Ok(())
    }

    /// Position of an action in authoring order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDef> {
        self.actions.iter().find(|a| a.name == name)
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Raw values a visitor submitted (or that a render pass pre-fills), keyed by
/// form field name. Serialized as a bare map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Submission {
    pub values: Fields,
}

impl Submission {
    pub fn new(values: Fields) -> Self {
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self> {
        crate::io::read_yaml(path)
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field)
    }
}
