//! Deciding which discovered relationship belongs to which declaration.
//!
//! When several declarations of the same type point at the same related
//! contact, the Nth such declaration (counted across every earlier action of
//! the same kind, then earlier entries of the current action) takes the Nth
//! discovered record. An offset past the end of the discovered list means
//! there is nothing to update and a new record must be built.
//!
//! The one exception is the current employer/employee flag: when set on the
//! declaration, the record the CRM flags as current wins regardless of
//! position.

use super::spec::RelationshipSpec;
use crate::crm::Relationship;
use crate::store::{ActionIdentity, ActionOutputStore};
use crate::types::{ContactId, Direction, EntityId, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

// ---------------------------------------------------------------------------
// OffsetKey
// ---------------------------------------------------------------------------

/// What two declarations must share to compete for the same records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetKey {
    pub type_id: RelationshipTypeId,
    pub direction: Direction,
    pub related: ContactId,
}

impl OffsetKey {
    pub fn for_spec(spec: &RelationshipSpec, related: ContactId) -> Self {
        Self {
            type_id: spec.relationship_type_id,
            direction: spec.direction,
            related,
        }
    }

    /// Whether an already-claimed relationship counts against this key:
    /// same type, with the related contact on the slot opposite the
    /// declaring contact (either slot for `Equal`).
    pub fn claims(&self, rel: &Relationship) -> bool {
        rel.relationship_type_id == self.type_id
            && rel.has_on_side(self.related, self.direction.inverse())
    }
}

/// Number of `claims` that compete with `key`.
pub fn count_claims<'a, I>(claims: I, key: &OffsetKey) -> usize
where
    I: IntoIterator<Item = &'a Relationship>,
{
    claims.into_iter().filter(|r| key.claims(r)).count()
}

/// Zero-based offset for the declaration described by `key`.
///
/// Counts claims recorded by strictly-earlier actions of the same kind (the
/// current action is never counted against itself), plus the keys already
/// claimed by earlier entries of the current action.
pub fn compute_offset(
    store: &ActionOutputStore,
    current: ActionIdentity<'_>,
    earlier_in_action: &[OffsetKey],
    key: &OffsetKey,
) -> usize {
    let from_earlier_actions: usize = store
        .earlier_of_kind(current)
        .into_iter()
        .map(|o| count_claims(&o.relationships, key))
        .sum();
    let from_this_action = earlier_in_action.iter().filter(|k| *k == key).count();
    from_earlier_actions + from_this_action
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum MatchVia {
    CurrentFlag,
    Offset { offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Existing {
        relationship: Relationship,
        via: MatchVia,
    },
    CreateNew {
        offset: usize,
    },
}

impl Selection {
    pub fn existing(&self) -> Option<&Relationship> {
        match self {
            Selection::Existing { relationship, .. } => Some(relationship),
            Selection::CreateNew { .. } => None,
        }
    }
}

fn unclaimed(rel: &Relationship, claimed: &HashSet<EntityId>) -> bool {
    rel.id.map_or(true, |id| !claimed.contains(&id))
}

/// The employer/employee override: the record flagged current, if the
/// declaration asks for it and the type is the employer type.
pub fn select_current<'a>(
    discovered: &'a [Relationship],
    spec: &RelationshipSpec,
    employer_type_id: RelationshipTypeId,
) -> Option<&'a Relationship> {
    if spec.relationship_type_id != employer_type_id || !spec.is_current {
        return None;
    }
    discovered.iter().find(|r| r.is_current)
}

/// Positional match. `None` when the offset runs past the discovered list.
pub fn select_by_offset(discovered: &[Relationship], offset: usize) -> Option<&Relationship> {
    discovered.get(offset)
}

/// Override first, offset second. A record another declaration already
/// claimed is never handed out twice: when the offset lands on one, the
/// first unclaimed record is used instead.
pub fn select(
    discovered: &[Relationship],
    spec: &RelationshipSpec,
    offset: usize,
    employer_type_id: RelationshipTypeId,
    claimed: &HashSet<EntityId>,
) -> Selection {
    if let Some(current) = select_current(discovered, spec, employer_type_id) {
        if unclaimed(current, claimed) {
            debug!(id = ?current.id, "matched current employer relationship");
            return Selection::Existing {
                relationship: current.clone(),
                via: MatchVia::CurrentFlag,
            };
        }
    }

    match select_by_offset(discovered, offset) {
        Some(rel) if unclaimed(rel, claimed) => {
            debug!(id = ?rel.id, offset, "matched relationship by offset");
            Selection::Existing {
                relationship: rel.clone(),
                via: MatchVia::Offset { offset },
            }
        }
        // The positional record went to another declaration, usually through
        // the current flag. Take the first record nobody has claimed.
        Some(rel) => {
            debug!(id = ?rel.id, offset, "relationship at offset already claimed");
            match discovered.iter().position(|r| unclaimed(r, claimed)) {
                Some(i) => Selection::Existing {
                    relationship: discovered[i].clone(),
                    via: MatchVia::Offset { offset: i },
                },
                None => Selection::CreateNew { offset },
            }
        }
        None => Selection::CreateNew { offset },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
