//! Relationship declarations on contact actions.
//!
//! Pipeline: `spec` (parse authored entries) → `discovery` (existing records
//! anchored at the related contact) → `offset` (which record belongs to which
//! declaration, with the current-employer override) → `reconcile` (update or
//! create, then persist).

pub mod discovery;
pub mod offset;
pub mod reconcile;
pub mod spec;

pub use discovery::discover;
pub use offset::{compute_offset, select, MatchVia, OffsetKey, Selection};
pub use reconcile::{
    persist, Operation, Reconciler, RelationshipInstruction, RelationshipOutcome, SpecMatch,
};
pub use spec::{parse_entries, parse_entry, parse_type_token, RelationshipSpec};
