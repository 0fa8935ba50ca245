//! Name-based lookup of what another action produced.
//!
//! A miss is never an error. The referenced action may appear later in the
//! form, may have been skipped by its conditional, or may not exist; callers
//! treat all three as "no relation yet".

use crate::store::{ActionOutput, ActionOutputStore};
use crate::types::{ActionKind, ContactId, EntityId};
use tracing::debug;

pub struct Resolver<'a> {
    store: &'a ActionOutputStore,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a ActionOutputStore) -> Self {
        Self { store }
    }

    /// Output of `action`, when present and (if given) of `kind`.
    pub fn get_output(&self, action: &str, kind: Option<ActionKind>) -> Option<&'a ActionOutput> {
        let found = self.store.get_output(action, kind);
        if found.is_none() {
            debug!(action, kind = ?kind, "reference not resolved");
        }
        found
    }

    /// Id of the entity `action` produced, whatever its kind.
    pub fn entity_id(&self, action: &str) -> Option<EntityId> {
        self.get_output(action, None).and_then(|o| o.entity_id)
    }

    /// Id of the contact produced by the contact action `action`.
    pub fn contact_id(&self, action: &str) -> Option<ContactId> {
        self.get_output(action, Some(ActionKind::Contact))
            .and_then(|o| o.entity_id)
    }

    /// A single field of `action`'s produced entity. `id` maps to the entity id.
    pub fn field(&self, action: &str, field: &str) -> Option<serde_json::Value> {
        let output = self.get_output(action, None)?;
        if field == "id" {
            return output.entity_id.map(serde_json::Value::from);
        }
        output.data.get(field).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ActionIdentity;
    use crate::types::Fields;

    fn output(name: &str, kind: ActionKind, order: usize, id: Option<EntityId>) -> ActionOutput {
        let mut data = Fields::new();
        data.insert("first_name".into(), "Grace".into());
        ActionOutput::new(ActionIdentity { name, kind, order }, id, data)
    }

    #[test]
    fn resolves_only_after_the_referenced_action_ran() {
        let mut store = ActionOutputStore::new();
        assert_eq!(Resolver::new(&store).contact_id("parent"), None);

        store.record_output(output("parent", ActionKind::Contact, 0, Some(42)));
        assert_eq!(Resolver::new(&store).contact_id("parent"), Some(42));
    }

    #[test]
    fn contact_lookup_ignores_other_kinds() {
        let mut store = ActionOutputStore::new();
        store.record_output(output("case", ActionKind::Case, 0, Some(5)));
        let resolver = Resolver::new(&store);
        assert_eq!(resolver.contact_id("case"), None);
        assert_eq!(resolver.entity_id("case"), Some(5));
    }

    #[test]
    fn output_without_entity_resolves_to_none() {
        let mut store = ActionOutputStore::new();
        store.record_output(output("pending", ActionKind::Contact, 0, None));
        assert_eq!(Resolver::new(&store).contact_id("pending"), None);
    }

    #[test]
    fn field_lookup() {
        let mut store = ActionOutputStore::new();
        store.record_output(output("parent", ActionKind::Contact, 0, Some(3)));
        let resolver = Resolver::new(&store);
        assert_eq!(resolver.field("parent", "first_name"), Some("Grace".into()));
        assert_eq!(resolver.field("parent", "id"), Some(3.into()));
        assert_eq!(resolver.field("parent", "last_name"), None);
    }
}
