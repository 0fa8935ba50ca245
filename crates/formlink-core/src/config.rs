use crate::error::Result;
use crate::form::FormDefinition;
use crate::memory::DEFAULT_EMPLOYER_TYPE_ID;
use crate::relationship::parse_type_token;
use crate::types::{ActionKind, Direction, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RelationshipTypeDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeDef {
    pub id: RelationshipTypeId,
    #[serde(default)]
    pub label_a_b: String,
    #[serde(default)]
    pub label_b_a: String,
    /// Sides are interchangeable; declarations must use `equal`.
    #[serde(default)]
    pub symmetric: bool,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// The "Employee of / Employer of" type, whose current flag overrides
    /// positional matching.
    #[serde(default = "default_employer_type")]
    pub employer_relationship_type_id: RelationshipTypeId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship_types: Vec<RelationshipTypeDef>,
}

fn default_version() -> u32 {
    1
}

fn default_employer_type() -> RelationshipTypeId {
    DEFAULT_EMPLOYER_TYPE_ID
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            employer_relationship_type_id: default_employer_type(),
            relationship_types: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn relationship_type(&self, id: RelationshipTypeId) -> Option<&RelationshipTypeDef> {
        self.relationship_types.iter().find(|t| t.id == id)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Static checks of `form` against this configuration. Nothing here
    /// blocks a pass; the engine degrades gracefully on every case listed.
    pub fn validate(&self, form: &FormDefinition) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |level: WarnLevel, action: &str, message: String| {
            warnings.push(ConfigWarning {
                level,
                action: Some(action.to_string()),
                message,
            });
        };

        for (pos, action) in form.actions.iter().enumerate() {
            // 1. Contact actions need a contact type to save
            if action.kind == ActionKind::Contact
                && action.contact_type.as_deref().map_or(true, |t| t.trim().is_empty())
            {
                warn(
                    WarnLevel::Warning,
                    &action.name,
                    "contact action has no contact_type; it will fail validation".to_string(),
                );
            }

            // 2. Entity references
            for (field, target) in &action.references {
                match form.position(target) {
                    None => warn(
                        WarnLevel::Warning,
                        &action.name,
                        format!("reference '{field}' names unknown action '{target}'"),
                    ),
                    Some(p) if p >= pos => warn(
                        WarnLevel::Warning,
                        &action.name,
                        format!(
                            "reference '{field}' names action '{target}' which runs later; \
                             it will never resolve"
                        ),
                    ),
                    Some(_) => {}
                }
            }

            if action.relationships.is_empty() {
                continue;
            }
            if action.kind != ActionKind::Contact {
                warn(
                    WarnLevel::Warning,
                    &action.name,
                    format!("relationships on a {} action are ignored", action.kind),
                );
                continue;
            }

            // 3. Relationship declarations
            for (i, entry) in action.relationships.iter().enumerate() {
                let Some(related) = entry.related_action.as_deref().filter(|s| !s.is_empty())
                else {
                    continue;
                };
                match form.position(related) {
                    None => warn(
                        WarnLevel::Warning,
                        &action.name,
                        format!("relationship #{i} names unknown action '{related}'"),
                    ),
                    Some(p) => {
                        if p >= pos {
                            warn(
                                WarnLevel::Warning,
                                &action.name,
                                format!(
                                    "relationship #{i} names action '{related}' which runs later; \
                                     it will be skipped"
                                ),
                            );
                        }
                        let kind = form.actions[p].kind;
                        if kind != ActionKind::Contact {
                            warn(
                                WarnLevel::Error,
                                &action.name,
                                format!("relationship #{i} names '{related}', a {kind} action"),
                            );
                        }
                    }
                }

                let Some(token) = entry.relationship_type.as_deref().filter(|s| !s.is_empty())
                else {
                    continue;
                };
                let (type_id, direction) = match parse_type_token(token) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn(WarnLevel::Error, &action.name, format!("relationship #{i}: {e}"));
                        continue;
                    }
                };

                // 4. Catalogue checks
                if self.relationship_types.is_empty() {
                    continue;
                }
                match self.relationship_type(type_id) {
                    None => warn(
                        WarnLevel::Warning,
                        &action.name,
                        format!("relationship #{i} uses unknown relationship type {type_id}"),
                    ),
                    Some(def) if def.symmetric && direction != Direction::Equal => warn(
                        WarnLevel::Warning,
                        &action.name,
                        format!(
                            "relationship #{i}: type {type_id} is symmetric; use '{type_id}_equal'"
                        ),
                    ),
                    Some(def) if !def.symmetric && direction == Direction::Equal => warn(
                        WarnLevel::Error,
                        &action.name,
                        format!("relationship #{i}: type {type_id} is directional, not equal"),
                    ),
                    Some(_) => {}
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
