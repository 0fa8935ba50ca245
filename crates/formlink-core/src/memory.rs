//! In-memory CRM backed by a JSON snapshot.
//!
//! Ids come from a single counter shared by contacts, relationships and
//! other entities. Relationship reads derive `is_current` for the employer
//! type from each contact's `employer_id`.

use crate::crm::{Contact, CrmRead, CrmWrite, Relationship};
use crate::error::{FormlinkError, Result};
use crate::types::{ActionKind, ContactId, Direction, EntityId, Fields, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_EMPLOYER_TYPE_ID: RelationshipTypeId = 5;

fn default_employer_type() -> RelationshipTypeId {
    DEFAULT_EMPLOYER_TYPE_ID
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: EntityId,
    pub kind: ActionKind,
    #[serde(default)]
    pub data: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCrm {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub entities: Vec<StoredEntity>,
    #[serde(default = "default_employer_type")]
    pub employer_relationship_type_id: RelationshipTypeId,
    /// Relationship types whose writes are refused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reject_relationship_types: Vec<RelationshipTypeId>,
}

impl Default for MemoryCrm {
    fn default() -> Self {
        Self {
            contacts: Vec::new(),
            relationships: Vec::new(),
            entities: Vec::new(),
            employer_relationship_type_id: DEFAULT_EMPLOYER_TYPE_ID,
            reject_relationship_types: Vec::new(),
        }
    }
}

impl MemoryCrm {
    pub fn load(path: &Path) -> Result<Self> {
        crate::io::read_yaml(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    fn next_id(&self) -> EntityId {
        let contacts = self.contacts.iter().map(|c| c.id);
        let rels = self.relationships.iter().filter_map(|r| r.id);
        let entities = self.entities.iter().map(|e| e.id);
        contacts.chain(rels).chain(entities).max().unwrap_or(0) + 1
    }

    /// Store a relationship as-is, assigning an id. Returns the id.
    pub fn insert_relationship(&mut self, mut rel: Relationship) -> EntityId {
        let id = self.next_id();
        rel.id = Some(id);
        self.relationships.push(rel);
        id
    }

    pub fn contact(&self, id: ContactId) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn relationship(&self, id: EntityId) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.id == Some(id))
    }

    fn with_derived_status(&self, rel: &Relationship) -> Relationship {
        let mut out = rel.clone();
        out.is_current = rel.is_active
            && rel.relationship_type_id == self.employer_relationship_type_id
            && self
                .contact(rel.contact_id_a)
                .is_some_and(|c| c.employer_id == Some(rel.contact_id_b));
        out
    }

    fn save_contact(&mut self, id: Option<EntityId>, data: &Fields) -> Result<EntityId> {
        let contact_type = data
            .get("contact_type")
            .and_then(|v| v.as_str())
            .map(String::from);
        let mut fields = data.clone();
        fields.remove("contact_type");
        fields.remove("id");

        match id {
            Some(id) => {
                let contact = self
                    .contacts
                    .iter_mut()
                    .find(|c| c.id == id)
                    .ok_or_else(|| FormlinkError::EntityNotFound {
                        kind: "contact".into(),
                        id,
                    })?;
                if contact_type.is_some() {
                    contact.contact_type = contact_type;
                }
                contact.fields.extend(fields);
                Ok(id)
            }
            None => {
                let id = self.next_id();
                self.contacts.push(Contact {
                    id,
                    contact_type,
                    employer_id: None,
                    fields,
                });
                Ok(id)
            }
        }
    }
}

impl CrmRead for MemoryCrm {
    fn find_relationships(
        &self,
        related_contact_id: ContactId,
        type_id: RelationshipTypeId,
        direction: Direction,
    ) -> Result<Vec<Relationship>> {
        let mut found: Vec<Relationship> = self
            .relationships
            .iter()
            .filter(|r| r.is_active && r.relationship_type_id == type_id)
            .filter(|r| r.has_on_side(related_contact_id, direction))
            .map(|r| self.with_derived_status(r))
            .collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        Ok(self.contact(id).cloned())
    }
}

impl CrmWrite for MemoryCrm {
    fn upsert_relationship(&mut self, relationship: &Relationship) -> Result<Relationship> {
        if self
            .reject_relationship_types
            .contains(&relationship.relationship_type_id)
        {
            return Err(FormlinkError::Crm(format!(
                "relationship type {} is not writable",
                relationship.relationship_type_id
            )));
        }

        let mut stored = relationship.clone();
        stored.is_current = false;
        let id = match relationship.id {
            Some(id) => {
                let slot = self
                    .relationships
                    .iter_mut()
                    .find(|r| r.id == Some(id))
                    .ok_or_else(|| FormlinkError::EntityNotFound {
                        kind: "relationship".into(),
                        id,
                    })?;
                *slot = stored;
                id
            }
            None => self.insert_relationship(stored),
        };

        if relationship.is_current
            && relationship.relationship_type_id == self.employer_relationship_type_id
        {
            let employer = relationship.contact_id_b;
            if let Some(c) = self
                .contacts
                .iter_mut()
                .find(|c| c.id == relationship.contact_id_a)
            {
                c.employer_id = Some(employer);
            }
        }

        let saved = self
            .relationship(id)
            .map(|r| self.with_derived_status(r))
            .ok_or_else(|| FormlinkError::EntityNotFound {
                kind: "relationship".into(),
                id,
            })?;
        Ok(saved)
    }

    fn save_entity(
        &mut self,
        kind: ActionKind,
        id: Option<EntityId>,
        data: &Fields,
    ) -> Result<EntityId> {
        if kind == ActionKind::Contact {
            return self.save_contact(id, data);
        }
        match id {
            Some(id) => {
                let entity = self
                    .entities
                    .iter_mut()
                    .find(|e| e.id == id && e.kind == kind)
                    .ok_or_else(|| FormlinkError::EntityNotFound {
                        kind: kind.to_string(),
                        id,
                    })?;
                entity.data.extend(data.clone());
                Ok(id)
            }
            None => {
                let id = self.next_id();
                self.entities.push(StoredEntity {
                    id,
                    kind,
                    data: data.clone(),
                });
                Ok(id)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
