//! Collaborator interfaces onto the CRM.
//!
//! The engine never persists anything itself. It decides which record to
//! write and in what role, then hands the write to a `CrmWrite`
//! implementation. `MemoryCrm` (in `memory`) is the in-process implementation
//! used by the CLI and the tests.

use crate::error::Result;
use crate::types::{ActionKind, ContactId, Direction, EntityId, Fields, RelationshipTypeId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_type: Option<String>,
    /// Organisation this contact currently works for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employer_id: Option<ContactId>,
    #[serde(flatten)]
    pub fields: Fields,
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// `None` until the CRM has stored the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub contact_id_a: ContactId,
    pub contact_id_b: ContactId,
    pub relationship_type_id: RelationshipTypeId,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Derived by the CRM: this is the contact's current employer/employee link.
    #[serde(default)]
    pub is_current: bool,
    #[serde(default, skip_serializing_if = "Fields::is_empty")]
    pub fields: Fields,
}

fn default_active() -> bool {
    true
}

impl Relationship {
    pub fn new(relationship_type_id: RelationshipTypeId, a: ContactId, b: ContactId) -> Self {
        Self {
            id: None,
            contact_id_a: a,
            contact_id_b: b,
            relationship_type_id,
            is_active: true,
            is_current: false,
            fields: Fields::new(),
        }
    }

    /// Whether `contact` sits on the side implied by `direction`
    /// (`Ab` = side A, `Ba` = side B, `Equal` = either).
    pub fn has_on_side(&self, contact: ContactId, direction: Direction) -> bool {
        match direction {
            Direction::Ab => self.contact_id_a == contact,
            Direction::Ba => self.contact_id_b == contact,
            Direction::Equal => self.contact_id_a == contact || self.contact_id_b == contact,
        }
    }

    /// The contact opposite `contact`, or `None` if `contact` is on neither side.
    pub fn other_side(&self, contact: ContactId) -> Option<ContactId> {
        if self.contact_id_a == contact {
            Some(self.contact_id_b)
        } else if self.contact_id_b == contact {
            Some(self.contact_id_a)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

pub trait CrmRead {
    /// Every relationship of `type_id` where `related_contact_id` sits on the
    /// side implied by `direction`, in the CRM's canonical (creation) order.
    fn find_relationships(
        &self,
        related_contact_id: ContactId,
        type_id: RelationshipTypeId,
        direction: Direction,
    ) -> Result<Vec<Relationship>>;

    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>>;
}

pub trait CrmWrite {
    /// Create the relationship when `id` is `None`, update it otherwise.
    fn upsert_relationship(&mut self, relationship: &Relationship) -> Result<Relationship>;

    /// Create or update the primary entity an action produces.
    fn save_entity(
        &mut self,
        kind: ActionKind,
        id: Option<EntityId>,
        data: &Fields,
    ) -> Result<EntityId>;
}
