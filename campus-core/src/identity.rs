//! Identity types for campus records

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Record identifier.
/// Server-assigned ids and locally generated provisional ids share this type.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}
