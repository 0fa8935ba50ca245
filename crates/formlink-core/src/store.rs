//! Per-pass side table of what each action produced.
//!
//! One `ActionOutputStore` lives for exactly one load or submission pass. It
//! is threaded explicitly through every action invocation and dropped when
//! the pass ends; nothing here is global or shared between requests.

use crate::crm::Relationship;
use crate::types::{ActionKind, EntityId, Fields};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// ActionIdentity
// ---------------------------------------------------------------------------

/// The in-progress action, as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionIdentity<'a> {
    pub name: &'a str,
    pub kind: ActionKind,
    /// Position in authoring order.
    pub order: usize,
}

// ---------------------------------------------------------------------------
// ActionOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub action: String,
    pub kind: ActionKind,
    pub order: usize,
    /// Id of the produced (or loaded) entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub data: Fields,
    /// Relationships this action claimed, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl ActionOutput {
    pub fn new(identity: ActionIdentity<'_>, entity_id: Option<EntityId>, data: Fields) -> Self {
        Self {
            action: identity.name.to_string(),
            kind: identity.kind,
            order: identity.order,
            entity_id,
            data,
            relationships: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionOutputStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ActionOutputStore {
    outputs: HashMap<String, ActionOutput>,
}

impl ActionOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the output for `output.action`.
    pub fn record_output(&mut self, output: ActionOutput) {
        self.outputs.insert(output.action.clone(), output);
    }

    /// Stored output for `action`, optionally constrained to `kind`.
    pub fn get_output(&self, action: &str, kind: Option<ActionKind>) -> Option<&ActionOutput> {
        self.outputs
            .get(action)
            .filter(|o| kind.map_or(true, |k| o.kind == k))
    }

    pub fn get_output_mut(&mut self, action: &str) -> Option<&mut ActionOutput> {
        self.outputs.get_mut(action)
    }

    /// Outputs of `current.kind` that precede `current` in authoring order,
    /// never including `current` itself. Sorted by order.
    pub fn earlier_of_kind(&self, current: ActionIdentity<'_>) -> Vec<&ActionOutput> {
        let mut earlier: Vec<&ActionOutput> = self
            .outputs
            .values()
            .filter(|o| o.kind == current.kind)
            .filter(|o| o.action != current.name && o.order < current.order)
            .collect();
        earlier.sort_by_key(|o| o.order);
        earlier
    }

    /// Relationship ids already claimed by any action preceding `order`.
    pub fn claimed_before(&self, order: usize) -> HashSet<EntityId> {
        self.outputs
            .values()
            .filter(|o| o.order < order)
            .flat_map(|o| o.relationships.iter())
            .filter_map(|r| r.id)
            .collect()
    }

    /// Drop the output recorded for `action`, returning it.
    pub fn remove(&mut self, action: &str) -> Option<ActionOutput> {
        self.outputs.remove(action)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// All outputs in authoring order.
    pub fn outputs(&self) -> Vec<&ActionOutput> {
        let mut all: Vec<&ActionOutput> = self.outputs.values().collect();
        all.sort_by_key(|o| o.order);
        all
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str, kind: ActionKind, order: usize) -> ActionIdentity<'_> {
        ActionIdentity { name, kind, order }
    }

    fn output(name: &str, kind: ActionKind, order: usize, id: EntityId) -> ActionOutput {
        ActionOutput::new(ident(name, kind, order), Some(id), Fields::new())
    }

    fn claimed(rel_id: EntityId, a: EntityId) -> Relationship {
        let mut rel = Relationship::new(1, a, 9);
        rel.id = Some(rel_id);
        rel
    }

    #[test]
    fn record_overwrites_previous_output() {
        let mut store = ActionOutputStore::new();
        assert!(store.is_empty());
        store.record_output(output("a", ActionKind::Contact, 0, 1));
        store.record_output(output("a", ActionKind::Contact, 0, 2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_output("a", None).unwrap().entity_id, Some(2));
    }

    #[test]
    fn get_output_filters_by_kind() {
        let mut store = ActionOutputStore::new();
        store.record_output(output("call", ActionKind::Activity, 0, 7));
        assert!(store.get_output("call", Some(ActionKind::Activity)).is_some());
        assert!(store.get_output("call", Some(ActionKind::Contact)).is_none());
        assert!(store.get_output("missing", None).is_none());
    }

    #[test]
    fn earlier_of_kind_excludes_self_and_later() {
        let mut store = ActionOutputStore::new();
        store.record_output(output("c0", ActionKind::Contact, 0, 1));
        store.record_output(output("act", ActionKind::Activity, 1, 2));
        store.record_output(output("c2", ActionKind::Contact, 2, 3));
        store.record_output(output("c3", ActionKind::Contact, 3, 4));

        let earlier = store.earlier_of_kind(ident("c2", ActionKind::Contact, 2));
        let names: Vec<&str> = earlier.iter().map(|o| o.action.as_str()).collect();
        assert_eq!(names, vec!["c0"]);
    }

    #[test]
    fn outputs_come_back_in_authoring_order() {
        let mut store = ActionOutputStore::new();
        store.record_output(output("late", ActionKind::Case, 4, 1));
        store.record_output(output("early", ActionKind::Contact, 0, 2));
        store.record_output(output("mid", ActionKind::Activity, 2, 3));
        store.remove("mid");

        let names: Vec<&str> = store.outputs().iter().map(|o| o.action.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn claimed_before_collects_ids() {
        let mut store = ActionOutputStore::new();
        let mut first = output("c0", ActionKind::Contact, 0, 1);
        first.relationships.push(claimed(100, 1));
        first.relationships.push(Relationship::new(1, 1, 8));
        store.record_output(first);

        let mut later = output("c5", ActionKind::Contact, 5, 2);
        later.relationships.push(claimed(200, 2));
        store.record_output(later);

        let claimed = store.claimed_before(3);
        assert!(claimed.contains(&100));
        assert!(!claimed.contains(&200));
        assert_eq!(claimed.len(), 1);
    }
}
