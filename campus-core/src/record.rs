//! The record contract shared by every synced table.

use crate::{EntityId, Table, Timestamp, ValidationError};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// A typed row of a remote table.
///
/// Identity is by [`Record::id`] only; the cache never matches records by
/// comparing field values. `PartialEq` compares every field and exists so
/// callers can assert exact cache contents.
///
/// # Implementation Requirements
///
/// - `TABLE` names the remote table the type is stored in
/// - `validate()` is the ingress check applied to every record that crosses
///   the remote boundary (fetch results, insert responses, change events)
/// - `materialize()` builds the optimistic record shown before the remote
///   confirms an insert; the remote may later return different `id` and
///   `created_at` values
pub trait Record:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Fields supplied by the caller when creating a record.
    type Draft: Clone + Debug + Serialize + Send + Sync + 'static;

    /// Partial update; `None` fields are left untouched.
    type Patch: Clone + Debug + Serialize + Send + Sync + 'static;

    /// Remote table holding this record type.
    const TABLE: Table;

    /// Column list requested when fetching pages.
    const SELECT: &'static str = "*";

    fn id(&self) -> EntityId;

    fn created_at(&self) -> Timestamp;

    /// Ingress validation of a record received from the remote.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Local validation of a draft before anything is sent.
    fn validate_draft(draft: &Self::Draft) -> Result<(), ValidationError>;

    /// Local validation of a patch before anything is sent.
    fn validate_patch(_patch: &Self::Patch) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Build the optimistic record for a draft.
    fn materialize(id: EntityId, created_at: Timestamp, draft: &Self::Draft) -> Self;

    /// Apply a partial update in place.
    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Take a confirmed value from the remote in place of the cached one.
    ///
    /// Change events carry the bare row, without embedded joins. Types that
    /// select joined columns override this to keep what the event lacks.
    fn merge_confirmed(&mut self, incoming: Self) {
        *self = incoming;
    }

    /// Value of a column as JSON, used for equality filters.
    fn column(&self, name: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => map.remove(name),
            _ => None,
        }
    }
}

/// Reject nil ids on ingress.
pub(crate) fn require_id(id: EntityId, field: &str) -> Result<(), ValidationError> {
    if id.is_nil() {
        return Err(ValidationError::invalid(field, "must not be nil"));
    }
    Ok(())
}
