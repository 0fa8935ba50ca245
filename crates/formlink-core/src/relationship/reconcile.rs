//! Update-or-create decisions for a contact action's relationship
//! declarations, and handing them to the CRM.

use super::discovery::discover;
use super::offset::{compute_offset, select, MatchVia, OffsetKey, Selection};
use super::spec::RelationshipSpec;
use crate::crm::{CrmRead, CrmWrite, Relationship};
use crate::mapping::is_empty_value;
use crate::resolver::Resolver;
use crate::store::{ActionIdentity, ActionOutputStore};
use crate::types::{ContactId, Direction, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Instructions and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
}

/// A declaration paired with the related contact and what it matched.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecMatch {
    pub spec: RelationshipSpec,
    pub related: ContactId,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInstruction {
    pub spec_index: usize,
    pub related_action: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchVia>,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipOutcome {
    #[serde(flatten)]
    pub instruction: RelationshipInstruction,
    /// Set when the CRM rejected the write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelationshipOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Record construction
// ---------------------------------------------------------------------------

fn merge_fields(
    target: &mut Relationship,
    spec: &RelationshipSpec,
    employer_type_id: RelationshipTypeId,
) {
    for (k, v) in &spec.fields {
        if !is_empty_value(v) {
            target.fields.insert(k.clone(), v.clone());
        }
    }
    target.is_active = true;
    if spec.is_current && spec.relationship_type_id == employer_type_id {
        target.is_current = true;
    }
}

/// A fresh relationship with `contact` in the slot `spec.direction` names
/// and `related` in the other.
pub fn build_new(
    spec: &RelationshipSpec,
    related: ContactId,
    contact: ContactId,
    employer_type_id: RelationshipTypeId,
) -> Relationship {
    let (a, b) = match spec.direction {
        Direction::Ab | Direction::Equal => (contact, related),
        Direction::Ba => (related, contact),
    };
    let mut rel = Relationship::new(spec.relationship_type_id, a, b);
    merge_fields(&mut rel, spec, employer_type_id);
    rel
}

/// `existing` with `contact` placed in the slot the related contact does not
/// hold, and non-empty incoming attribute values laid over stored ones. The
/// current flag comes from the declaration only, never from the stored record.
pub fn merge_update(
    existing: &Relationship,
    spec: &RelationshipSpec,
    related: ContactId,
    contact: ContactId,
    employer_type_id: RelationshipTypeId,
) -> Relationship {
    let mut rel = existing.clone();
    rel.is_current = false;
    match spec.direction {
        Direction::Ab => rel.contact_id_a = contact,
        Direction::Ba => rel.contact_id_b = contact,
        Direction::Equal if rel.contact_id_a == related => rel.contact_id_b = contact,
        Direction::Equal => rel.contact_id_a = contact,
    }
    merge_fields(&mut rel, spec, employer_type_id);
    rel
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler<'a> {
    store: &'a ActionOutputStore,
    employer_type_id: RelationshipTypeId,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a ActionOutputStore, employer_type_id: RelationshipTypeId) -> Self {
        Self {
            store,
            employer_type_id,
        }
    }

    /// Resolve, discover and select for every declaration of `current`.
    ///
    /// Declarations whose related action produced no contact, or whose
    /// discovery read failed, are dropped.
    pub fn match_specs<R: CrmRead + ?Sized>(
        &self,
        crm: &R,
        current: ActionIdentity<'_>,
        specs: &[RelationshipSpec],
    ) -> Vec<SpecMatch> {
        let resolver = Resolver::new(self.store);
        let mut claimed = self.store.claimed_before(current.order);
        let mut earlier_keys: Vec<OffsetKey> = Vec::new();
        let mut matches = Vec::new();

        for spec in specs {
            let Some(related) = resolver.contact_id(&spec.related_action) else {
                debug!(
                    action = current.name,
                    related_action = %spec.related_action,
                    "related contact not available, skipping relationship"
                );
                continue;
            };

            let discovered = match discover(crm, related, spec) {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        action = current.name,
                        related,
                        error = %e,
                        "relationship discovery failed"
                    );
                    continue;
                }
            };

            let key = OffsetKey::for_spec(spec, related);
            let offset = compute_offset(self.store, current, &earlier_keys, &key);
            let selection = select(&discovered, spec, offset, self.employer_type_id, &claimed);
            if let Some(id) = selection.existing().and_then(|r| r.id) {
                claimed.insert(id);
            }
            earlier_keys.push(key);

            matches.push(SpecMatch {
                spec: spec.clone(),
                related,
                selection,
            });
        }
        matches
    }

    /// Update/create instructions for `contact`, the contact `current` saved.
    pub fn reconcile<R: CrmRead + ?Sized>(
        &self,
        crm: &R,
        current: ActionIdentity<'_>,
        contact: ContactId,
        specs: &[RelationshipSpec],
    ) -> Vec<RelationshipInstruction> {
        self.match_specs(crm, current, specs)
            .into_iter()
            .map(|m| self.instruction(m, contact))
            .collect()
    }

    fn instruction(&self, m: SpecMatch, contact: ContactId) -> RelationshipInstruction {
        let (operation, matched, relationship) = match &m.selection {
            Selection::Existing { relationship, via } => (
                Operation::Update,
                Some(*via),
                merge_update(relationship, &m.spec, m.related, contact, self.employer_type_id),
            ),
            Selection::CreateNew { .. } => (
                Operation::Create,
                None,
                build_new(&m.spec, m.related, contact, self.employer_type_id),
            ),
        };
        RelationshipInstruction {
            spec_index: m.spec.index,
            related_action: m.spec.related_action,
            operation,
            matched,
            relationship,
        }
    }
}

/// Write every instruction, one call each. A rejected write is logged and
/// reported but never stops the remaining ones.
pub fn persist<W: CrmWrite + ?Sized>(
    crm: &mut W,
    instructions: Vec<RelationshipInstruction>,
) -> Vec<RelationshipOutcome> {
    instructions
        .into_iter()
        .map(|mut instruction| match crm.upsert_relationship(&instruction.relationship) {
            Ok(stored) => {
                instruction.relationship = stored;
                RelationshipOutcome {
                    instruction,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    related_action = %instruction.related_action,
                    type_id = instruction.relationship.relationship_type_id,
                    error = %e,
                    "relationship write failed"
                );
                RelationshipOutcome {
                    instruction,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::Contact;
    use crate::error::{FormlinkError, Result};
    use crate::memory::MemoryCrm;
    use crate::store::ActionOutput;
    use crate::types::{ActionKind, EntityId, Fields};
    use serde_json::json;
    use std::collections::HashSet;

    const CHILD_OF: RelationshipTypeId = 1;
    const SIBLING: RelationshipTypeId = 4;
    const EMPLOYEE_OF: RelationshipTypeId = 5;

    fn contact(name: &str, order: usize) -> ActionIdentity<'_> {
        ActionIdentity {
            name,
            kind: ActionKind::Contact,
            order,
        }
    }

    fn record_contact(store: &mut ActionOutputStore, name: &str, order: usize, id: ContactId) {
        store.record_output(ActionOutput::new(contact(name, order), Some(id), Fields::new()));
    }

    fn me(order: usize) -> ActionIdentity<'static> {
        contact("me", order)
    }

    fn employee(id: ContactId, employer_id: Option<ContactId>) -> Contact {
        Contact {
            id,
            contact_type: Some("Individual".into()),
            employer_id,
            fields: Fields::new(),
        }
    }

    fn create(
        spec_index: usize,
        related: &str,
        relationship: Relationship,
    ) -> RelationshipInstruction {
        RelationshipInstruction {
            spec_index,
            related_action: related.into(),
            operation: Operation::Create,
            matched: None,
            relationship,
        }
    }

    fn ends(rel: &Relationship) -> (ContactId, ContactId) {
        (rel.contact_id_a, rel.contact_id_b)
    }

    /// Reads fail for one related contact and delegate to `MemoryCrm` otherwise.
    struct FlakyCrm {
        inner: MemoryCrm,
        broken: ContactId,
    }

    impl CrmRead for FlakyCrm {
        fn find_relationships(
            &self,
            related_contact_id: ContactId,
            type_id: RelationshipTypeId,
            direction: Direction,
        ) -> Result<Vec<Relationship>> {
            if related_contact_id == self.broken {
                return Err(FormlinkError::Crm("connection reset".into()));
            }
            self.inner.find_relationships(related_contact_id, type_id, direction)
        }

        fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
            self.inner.get_contact(id)
        }
    }

    #[test]
    fn two_child_of_declarations_without_existing_records_create_both() {
        let crm = MemoryCrm::default();
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "mother", 0, 20);
        record_contact(&mut store, "father", 1, 21);

        let specs = vec![
            RelationshipSpec::new(0, "mother", CHILD_OF, Direction::Ab),
            RelationshipSpec::new(1, "father", CHILD_OF, Direction::Ab),
        ];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(2), 30, &specs);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|i| i.operation == Operation::Create));
        assert_eq!(ends(&out[0].relationship), (30, 20));
        assert_eq!(ends(&out[1].relationship), (30, 21));
    }

    #[test]
    fn ba_direction_puts_saved_contact_on_side_b() {
        let crm = MemoryCrm::default();
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "kid", 0, 40);
        let specs = vec![RelationshipSpec::new(0, "kid", CHILD_OF, Direction::Ba)];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(1), 30, &specs);
        assert_eq!(ends(&out[0].relationship), (40, 30));
    }

    #[test]
    fn three_declarations_two_existing_records() {
        let mut crm = MemoryCrm::default();
        let first = crm.insert_relationship(Relationship::new(CHILD_OF, 11, 20));
        let second = crm.insert_relationship(Relationship::new(CHILD_OF, 12, 20));
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "parent", 0, 20);

        let specs: Vec<_> = (0..3)
            .map(|i| RelationshipSpec::new(i, "parent", CHILD_OF, Direction::Ab))
            .collect();
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(1), 30, &specs);
        assert_eq!(out[0].operation, Operation::Update);
        assert_eq!(out[0].relationship.id, Some(first));
        assert_eq!(out[1].operation, Operation::Update);
        assert_eq!(out[1].relationship.id, Some(second));
        assert_eq!(out[2].operation, Operation::Create);
        assert_eq!(out[2].relationship.id, None);
    }

    #[test]
    fn never_two_updates_for_the_same_record() {
        let mut crm = MemoryCrm::default();
        crm.contacts.push(employee(11, Some(50)));
        crm.insert_relationship(Relationship::new(EMPLOYEE_OF, 11, 50));
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "org", 0, 50);

        // The plain declaration takes offset 0, the flagged one asks for the
        // same (current) record and must not get it again.
        let plain = RelationshipSpec::new(0, "org", EMPLOYEE_OF, Direction::Ab);
        let mut flagged = RelationshipSpec::new(1, "org", EMPLOYEE_OF, Direction::Ab);
        flagged.is_current = true;
        let specs = [plain, flagged];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(1), 30, &specs);

        let updated: Vec<EntityId> = out
            .iter()
            .filter(|i| i.operation == Operation::Update)
            .filter_map(|i| i.relationship.id)
            .collect();
        let unique: HashSet<_> = updated.iter().collect();
        assert_eq!(updated.len(), unique.len());
        assert_eq!(out[1].operation, Operation::Create);
    }

    #[test]
    fn flagged_declaration_first_leaves_other_record_for_plain_one() {
        let mut crm = MemoryCrm::default();
        crm.contacts.push(employee(10, None));
        crm.contacts.push(employee(11, Some(50)));
        let former = crm.insert_relationship(Relationship::new(EMPLOYEE_OF, 10, 50));
        let current = crm.insert_relationship(Relationship::new(EMPLOYEE_OF, 11, 50));
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "org", 0, 50);

        let mut flagged = RelationshipSpec::new(0, "org", EMPLOYEE_OF, Direction::Ab);
        flagged.is_current = true;
        let plain = RelationshipSpec::new(1, "org", EMPLOYEE_OF, Direction::Ab);
        let specs = [flagged, plain];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(1), 30, &specs);

        assert_eq!(out[0].relationship.id, Some(current));
        assert_eq!(out[0].matched, Some(MatchVia::CurrentFlag));
        assert_eq!(out[1].operation, Operation::Update);
        assert_eq!(out[1].relationship.id, Some(former));
    }

    #[test]
    fn unresolved_related_action_is_skipped() {
        let crm = MemoryCrm::default();
        let store = ActionOutputStore::new();
        let specs = vec![RelationshipSpec::new(0, "later", CHILD_OF, Direction::Ab)];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(0), 30, &specs);
        assert!(out.is_empty());
    }

    #[test]
    fn failed_discovery_skips_only_that_declaration() {
        let mut inner = MemoryCrm::default();
        let existing = inner.insert_relationship(Relationship::new(CHILD_OF, 12, 21));
        let crm = FlakyCrm { inner, broken: 20 };
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "mother", 0, 20);
        record_contact(&mut store, "father", 1, 21);

        let specs = vec![
            RelationshipSpec::new(0, "mother", CHILD_OF, Direction::Ab),
            RelationshipSpec::new(1, "father", CHILD_OF, Direction::Ab),
        ];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(2), 30, &specs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].spec_index, 1);
        assert_eq!(out[0].operation, Operation::Update);
        assert_eq!(out[0].relationship.id, Some(existing));
    }

    #[test]
    fn update_merges_non_empty_values() {
        let mut existing = Relationship::new(CHILD_OF, 11, 20);
        existing.id = Some(3);
        existing.fields.insert("start_date".into(), json!("2001-01-01"));
        existing.fields.insert("description".into(), json!("kept"));

        let mut spec = RelationshipSpec::new(0, "parent", CHILD_OF, Direction::Ab);
        spec.fields.insert("start_date".into(), json!("2010-05-05"));
        spec.fields.insert("description".into(), json!(""));
        spec.fields.insert("end_date".into(), serde_json::Value::Null);

        let merged = merge_update(&existing, &spec, 20, 30, EMPLOYEE_OF);
        assert_eq!(merged.id, Some(3));
        assert_eq!(ends(&merged), (30, 20));
        assert_eq!(merged.fields["start_date"], json!("2010-05-05"));
        assert_eq!(merged.fields["description"], json!("kept"));
        assert!(!merged.fields.contains_key("end_date"));
    }

    #[test]
    fn update_takes_current_flag_from_declaration_only() {
        let mut existing = Relationship::new(EMPLOYEE_OF, 11, 50);
        existing.id = Some(6);
        existing.is_current = true;

        let plain = RelationshipSpec::new(0, "org", EMPLOYEE_OF, Direction::Ab);
        assert!(!merge_update(&existing, &plain, 50, 30, EMPLOYEE_OF).is_current);

        let mut flagged = plain.clone();
        flagged.is_current = true;
        assert!(merge_update(&existing, &flagged, 50, 30, EMPLOYEE_OF).is_current);
    }

    #[test]
    fn unflagged_update_leaves_employer_alone() {
        let mut crm = MemoryCrm::default();
        crm.contacts.push(employee(11, Some(50)));
        crm.contacts.push(employee(30, Some(60)));
        crm.insert_relationship(Relationship::new(EMPLOYEE_OF, 11, 50));
        let mut store = ActionOutputStore::new();
        record_contact(&mut store, "org", 0, 50);

        let specs = [RelationshipSpec::new(0, "org", EMPLOYEE_OF, Direction::Ab)];
        let out = Reconciler::new(&store, EMPLOYEE_OF).reconcile(&crm, me(1), 30, &specs);
        assert_eq!(out[0].operation, Operation::Update);
        persist(&mut crm, out);
        assert_eq!(crm.contact(30).unwrap().employer_id, Some(60));
    }

    #[test]
    fn equal_update_keeps_related_slot() {
        let mut existing = Relationship::new(SIBLING, 20, 11);
        existing.id = Some(4);
        let spec = RelationshipSpec::new(0, "sibling", SIBLING, Direction::Equal);
        let merged = merge_update(&existing, &spec, 20, 30, EMPLOYEE_OF);
        assert_eq!(ends(&merged), (20, 30));

        let mut flipped = Relationship::new(SIBLING, 11, 20);
        flipped.id = Some(5);
        let merged = merge_update(&flipped, &spec, 20, 30, EMPLOYEE_OF);
        assert_eq!(ends(&merged), (30, 20));
    }

    #[test]
    fn persist_continues_past_failures() {
        let mut crm = MemoryCrm::default();
        crm.reject_relationship_types.push(SIBLING);
        let instructions = vec![
            create(0, "sib", Relationship::new(SIBLING, 30, 20)),
            create(1, "parent", Relationship::new(CHILD_OF, 30, 21)),
        ];
        let outcomes = persist(&mut crm, instructions);
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[1].succeeded());
        assert!(outcomes[1].instruction.relationship.id.is_some());
        assert_eq!(crm.relationships.len(), 1);
    }
}
