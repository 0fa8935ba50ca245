use super::spec::RelationshipSpec;
use crate::crm::{CrmRead, Relationship};
use crate::error::Result;
use crate::types::ContactId;
use tracing::debug;

/// Existing relationships of `spec`'s type anchored at `related`, with
/// `related` on the side given by `spec.inverse`.
///
/// Order is the CRM's; the disambiguator indexes into it as-is. Records that
/// do not actually carry `related` on the expected side are dropped so that
/// exactly one slot of every returned record is the related contact.
pub fn discover<R: CrmRead + ?Sized>(
    crm: &R,
    related: ContactId,
    spec: &RelationshipSpec,
) -> Result<Vec<Relationship>> {
    let mut found = crm.find_relationships(related, spec.relationship_type_id, spec.inverse)?;
    let before = found.len();
    found.retain(|r| {
        r.relationship_type_id == spec.relationship_type_id && r.has_on_side(related, spec.inverse)
    });
    if found.len() != before {
        debug!(
            related,
            type_id = spec.relationship_type_id,
            dropped = before - found.len(),
            "discarded relationships not anchored at the related contact"
        );
    }
    Ok(found)
}
