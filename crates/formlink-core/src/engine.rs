//! The three passes a host drives over a form: `load` (render time),
//! `validate` and `make` (submission time).
//!
//! Every pass walks the actions strictly in authoring order and threads one
//! `ActionOutputStore` through them. Later actions, and the relationship
//! offset counting, depend on what earlier ones recorded there.

use crate::config::EngineConfig;
use crate::crm::{CrmRead, CrmWrite, Relationship};
use crate::error::Result;
use crate::form::{ActionDef, AutoLoad, FormDefinition, Submission};
use crate::mapping::{
    as_entity_id, is_empty_value, is_truthy, referenced_actions, FieldTagMapper, MappingContext,
    ValueMapper,
};
use crate::relationship::{
    parse_entries, persist, MatchVia, Operation, Reconciler, RelationshipOutcome,
    RelationshipSpec, Selection, SpecMatch,
};
use crate::resolver::Resolver;
use crate::store::{ActionIdentity, ActionOutput, ActionOutputStore};
use crate::types::{ActionKind, ContactId, Direction, EntityId, Fields, RelationshipTypeId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A user-visible problem attached to one action. Blocks that action only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub action: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Load pass located the entity.
    Loaded,
    /// Load pass ran but found nothing to pre-populate from.
    NotLoaded,
    /// Conditional evaluated falsy.
    Skipped,
    Saved,
    Invalid,
    /// The CRM rejected the primary entity write.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedRelationship {
    pub spec_index: usize,
    pub related_action: String,
    pub relationship_type_id: RelationshipTypeId,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchVia>,
    /// The existing record to redisplay, if one was matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
}

impl LoadedRelationship {
    fn from_match(m: &SpecMatch) -> Self {
        let (matched, relationship) = match &m.selection {
            Selection::Existing { relationship, via } => {
                (Some(*via), Some(relationship.clone()))
            }
            Selection::CreateNew { .. } => (None, None),
        };
        Self {
            spec_index: m.spec.index,
            related_action: m.spec.related_action.clone(),
            relationship_type_id: m.spec.relationship_type_id,
            direction: m.spec.direction,
            matched,
            relationship,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedAction {
    pub action: String,
    pub kind: ActionKind,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<ContactId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<LoadedRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub form: String,
    pub actions: Vec<LoadedAction>,
}

impl LoadReport {
    pub fn action(&self, name: &str) -> Option<&LoadedAction> {
        self.actions.iter().find(|a| a.action == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MadeAction {
    pub action: String,
    pub kind: ActionKind,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipOutcome>,
}

impl MadeAction {
    fn new(identity: ActionIdentity<'_>, status: ActionStatus) -> Self {
        Self {
            action: identity.name.to_string(),
            kind: identity.kind,
            status,
            entity_id: None,
            errors: Vec::new(),
            relationships: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeReport {
    pub form: String,
    pub actions: Vec<MadeAction>,
}

impl MakeReport {
    pub fn action(&self, name: &str) -> Option<&MadeAction> {
        self.actions.iter().find(|a| a.action == name)
    }
}

// ---------------------------------------------------------------------------
// FormEngine
// ---------------------------------------------------------------------------

pub struct FormEngine<M = FieldTagMapper> {
    config: EngineConfig,
    mapper: M,
}

impl FormEngine<FieldTagMapper> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_mapper(config, FieldTagMapper)
    }
}

impl<M: ValueMapper> FormEngine<M> {
    pub fn with_mapper(config: EngineConfig, mapper: M) -> Self {
        Self { config, mapper }
    }

    fn context<'a>(
        &self,
        submission: &'a Submission,
        action: &'a ActionDef,
        store: &'a ActionOutputStore,
    ) -> MappingContext<'a> {
        MappingContext {
            submission,
            action: &action.name,
            outputs: Some(store),
        }
    }

    fn is_enabled(&self, ctx: &MappingContext<'_>, action: &ActionDef) -> bool {
        action
            .conditional
            .as_ref()
            .map_or(true, |gate| is_truthy(&self.mapper.map(gate, ctx)))
    }

    fn specs_for(&self, ctx: &MappingContext<'_>, action: &ActionDef) -> Vec<RelationshipSpec> {
        if action.kind != ActionKind::Contact {
            return Vec::new();
        }
        parse_entries(action, &self.mapper, ctx)
    }

    // -----------------------------------------------------------------------
    // load
    // -----------------------------------------------------------------------

    /// Locate the contacts a form should pre-populate from, and the existing
    /// relationship records each declaration will redisplay.
    pub fn load<R: CrmRead + ?Sized>(
        &self,
        crm: &R,
        form: &FormDefinition,
        submission: &Submission,
        store: &mut ActionOutputStore,
    ) -> Result<LoadReport> {
        form.validate_structure()?;
        let mut actions = Vec::new();

        for (order, action) in form.actions.iter().enumerate() {
            if action.kind != ActionKind::Contact {
                continue;
            }
            let identity = ActionIdentity {
                name: &action.name,
                kind: action.kind,
                order,
            };
            actions.push(self.load_contact(crm, identity, action, submission, store));
        }

        Ok(LoadReport {
            form: form.name.clone(),
            actions,
        })
    }

    fn load_contact<R: CrmRead + ?Sized>(
        &self,
        crm: &R,
        identity: ActionIdentity<'_>,
        action: &ActionDef,
        submission: &Submission,
        store: &mut ActionOutputStore,
    ) -> LoadedAction {
        let (enabled, matches, wanted) = {
            let ctx = self.context(submission, action, store);
            let enabled = self.is_enabled(&ctx, action);
            let matches = if enabled {
                let specs = self.specs_for(&ctx, action);
                Reconciler::new(store, self.config.employer_relationship_type_id)
                    .match_specs(crm, identity, &specs)
            } else {
                Vec::new()
            };
            let wanted = match &action.auto_load {
                AutoLoad::None => None,
                AutoLoad::Contact { id } => as_entity_id(&self.mapper.map(id, &ctx)),
                AutoLoad::Relationship => matches.iter().find_map(|m| {
                    m.selection
                        .existing()
                        .and_then(|r| r.other_side(m.related))
                }),
            };
            (enabled, matches, wanted)
        };

        let mut loaded = LoadedAction {
            action: action.name.clone(),
            kind: action.kind,
            status: ActionStatus::Skipped,
            contact_id: None,
            relationships: matches.iter().map(LoadedRelationship::from_match).collect(),
        };
        if !enabled {
            info!(action = %action.name, "conditional is falsy, skipping load");
            return loaded;
        }

        let contact = wanted.and_then(|id| match crm.get_contact(id) {
            Ok(found) => {
                if found.is_none() {
                    debug!(action = %action.name, id, "contact to load does not exist");
                }
                found
            }
            Err(e) => {
                warn!(action = %action.name, id, error = %e, "contact lookup failed");
                None
            }
        });

        let (entity_id, data) = match contact {
            Some(contact) => {
                let mut data = contact.fields;
                if let Some(t) = contact.contact_type {
                    data.insert("contact_type".into(), t.into());
                }
                (Some(contact.id), data)
            }
            None => (None, Fields::new()),
        };
        loaded.status = if entity_id.is_some() {
            ActionStatus::Loaded
        } else {
            ActionStatus::NotLoaded
        };
        loaded.contact_id = entity_id;

        // Claims are recorded even without a contact so that later
        // declarations keep counting the same offsets they will see at make.
        let mut output = ActionOutput::new(identity, entity_id, data);
        output.relationships = matches
            .iter()
            .filter_map(|m| m.selection.existing().cloned())
            .collect();
        store.record_output(output);
        loaded
    }

    // -----------------------------------------------------------------------
    // validate
    // -----------------------------------------------------------------------

    /// Entity-level checks for every enabled action. Checks that depend on an
    /// action which has not produced output yet are skipped, not failed.
    pub fn validate(
        &self,
        form: &FormDefinition,
        submission: &Submission,
        store: &ActionOutputStore,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for action in &form.actions {
            let ctx = self.context(submission, action, store);
            if !self.is_enabled(&ctx, action) {
                continue;
            }
            let data = self.entity_data(&ctx, action, store);
            // Nothing has been saved yet in this pass, so every source without
            // output is still pending.
            errors.extend(
                self.check_action(action, &data, store, |_| false)
                    .into_iter()
                    .map(|message| ValidationError {
                        action: action.name.clone(),
                        message,
                    }),
            );
        }
        errors
    }

    /// Mapped entity fields plus resolved references.
    fn entity_data(
        &self,
        ctx: &MappingContext<'_>,
        action: &ActionDef,
        store: &ActionOutputStore,
    ) -> Fields {
        let mut data = self.mapper.map_fields(&action.fields, ctx);
        if action.kind == ActionKind::Contact {
            if let Some(t) = action.contact_type.as_deref().filter(|t| !t.trim().is_empty()) {
                data.insert("contact_type".into(), t.into());
            }
        }
        let resolver = Resolver::new(store);
        for (field, target) in &action.references {
            match resolver.entity_id(target) {
                Some(id) => {
                    data.insert(field.clone(), id.into());
                }
                None => {
                    debug!(
                        action = %action.name,
                        field = %field,
                        target = %target,
                        "reference omitted"
                    );
                }
            }
        }
        data
    }

    /// `has_run` tells whether the named action already had its turn in the
    /// current pass. A source that ran but left no output cannot fill the
    /// field any more, so the check applies.
    fn check_action(
        &self,
        action: &ActionDef,
        data: &Fields,
        store: &ActionOutputStore,
        has_run: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        if action.kind == ActionKind::Contact && !data.contains_key("contact_type") {
            errors.push("Contact type is required".to_string());
        }

        for field in &action.required {
            let present = data.get(field).is_some_and(|v| !is_empty_value(v));
            if present {
                continue;
            }
            // Values fed by actions that have not run yet cannot be judged.
            let sources = action.fields.get(field).map(referenced_actions);
            let pending = action
                .references
                .get(field)
                .into_iter()
                .cloned()
                .chain(sources.unwrap_or_default())
                .any(|target| store.get_output(&target, None).is_none() && !has_run(&target));
            if pending {
                debug!(
                    action = %action.name,
                    field = %field,
                    "required check skipped: source not yet available"
                );
                continue;
            }
            errors.push(format!("{field} is required"));
        }
        errors
    }

    // -----------------------------------------------------------------------
    // make
    // -----------------------------------------------------------------------

    /// Save every enabled, valid action in order and reconcile the
    /// relationships of contact actions. A failed write affects only the
    /// action (or relationship) it belongs to.
    pub fn make<C: CrmRead + CrmWrite + ?Sized>(
        &self,
        crm: &mut C,
        form: &FormDefinition,
        submission: &Submission,
        store: &mut ActionOutputStore,
    ) -> Result<MakeReport> {
        form.validate_structure()?;
        let mut actions = Vec::new();

        for (order, action) in form.actions.iter().enumerate() {
            let identity = ActionIdentity {
                name: &action.name,
                kind: action.kind,
                order,
            };
            actions.push(self.make_action(crm, form, identity, action, submission, store));
        }

        Ok(MakeReport {
            form: form.name.clone(),
            actions,
        })
    }

    fn make_action<C: CrmRead + CrmWrite + ?Sized>(
        &self,
        crm: &mut C,
        form: &FormDefinition,
        identity: ActionIdentity<'_>,
        action: &ActionDef,
        submission: &Submission,
        store: &mut ActionOutputStore,
    ) -> MadeAction {
        let (enabled, data, errors) = {
            let ctx = self.context(submission, action, store);
            let enabled = self.is_enabled(&ctx, action);
            let data = self.entity_data(&ctx, action, store);
            // Unknown sources never run, so they count as settled too.
            let has_run = |target: &str| form.position(target).map_or(true, |p| p < identity.order);
            let errors = if enabled {
                self.check_action(action, &data, store, has_run)
            } else {
                Vec::new()
            };
            (enabled, data, errors)
        };

        if !enabled {
            info!(action = %action.name, "conditional is falsy, skipping");
            store.remove(&action.name);
            return MadeAction::new(identity, ActionStatus::Skipped);
        }
        if !errors.is_empty() {
            info!(action = %action.name, errors = errors.len(), "action failed validation");
            store.remove(&action.name);
            let mut made = MadeAction::new(identity, ActionStatus::Invalid);
            made.errors = errors;
            return made;
        }

        // An entity located by the load pass is updated rather than duplicated.
        let existing = store
            .get_output(&action.name, Some(action.kind))
            .and_then(|o| o.entity_id);
        let entity_id = match crm.save_entity(action.kind, existing, &data) {
            Ok(id) => id,
            Err(e) => {
                warn!(action = %action.name, error = %e, "entity write failed");
                store.remove(&action.name);
                let mut made = MadeAction::new(identity, ActionStatus::Failed);
                made.errors.push(e.to_string());
                return made;
            }
        };
        store.record_output(ActionOutput::new(identity, Some(entity_id), data));

        let mut made = MadeAction::new(identity, ActionStatus::Saved);
        made.entity_id = Some(entity_id);

        if action.kind == ActionKind::Contact {
            let instructions = {
                let ctx = self.context(submission, action, store);
                let specs = self.specs_for(&ctx, action);
                Reconciler::new(store, self.config.employer_relationship_type_id)
                    .reconcile(&*crm, identity, entity_id, &specs)
            };
            let outcomes = persist(crm, instructions);

            // An update that failed still points at a record discovery will
            // return again, so it keeps its place in the offset count. A
            // failed create leaves nothing behind.
            let claims: Vec<Relationship> = outcomes
                .iter()
                .filter(|o| o.succeeded() || o.instruction.operation == Operation::Update)
                .map(|o| o.instruction.relationship.clone())
                .collect();
            if let Some(output) = store.get_output_mut(&action.name) {
                output.relationships = claims;
            }
            made.relationships = outcomes;
        }

        made
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
