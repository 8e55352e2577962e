//! Change notifications pushed by the remote.

use crate::{EntityId, Record, RemoteError, Table};
use serde::{Deserialize, Serialize};

/// A typed push notification for one table.
///
/// Events arrive asynchronously and carry no ordering guarantee relative to
/// the local mutation calls that caused them.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Inserted(T),
    Updated(T),
    Deleted(EntityId),
}

impl<T: Record> ChangeEvent<T> {
    /// Id of the record the event refers to.
    pub fn id(&self) -> EntityId {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => record.id(),
            ChangeEvent::Deleted(id) => *id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Inserted(_) => ChangeKind::Insert,
            ChangeEvent::Updated(_) => ChangeKind::Update,
            ChangeEvent::Deleted(_) => ChangeKind::Delete,
        }
    }
}

/// Kind of row change as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Untyped change as it comes off the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: Table,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

impl RawChange {
    /// Decode into a typed event, validating the record on ingress.
    pub fn decode<T: Record>(&self) -> Result<ChangeEvent<T>, RemoteError> {
        if self.table != T::TABLE {
            return Err(RemoteError::decode(format!(
                "change for table {} decoded as {}",
                self.table,
                T::TABLE
            )));
        }
        match self.kind {
            ChangeKind::Insert => Ok(ChangeEvent::Inserted(self.decode_record()?)),
            ChangeKind::Update => Ok(ChangeEvent::Updated(self.decode_record()?)),
            ChangeKind::Delete => {
                let id = self
                    .old_record
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .ok_or_else(|| RemoteError::decode("delete event without old_record.id"))?;
                let id: EntityId = serde_json::from_value(id.clone())?;
                Ok(ChangeEvent::Deleted(id))
            }
        }
    }

    fn decode_record<T: Record>(&self) -> Result<T, RemoteError> {
        let value = self
            .record
            .clone()
            .ok_or_else(|| RemoteError::decode(format!("{:?} event without record", self.kind)))?;
        let record: T = serde_json::from_value(value)?;
        record
            .validate()
            .map_err(|e| RemoteError::decode(e.to_string()))?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Comment, Post};
    use serde_json::json;

    fn post_json() -> serde_json::Value {
        json!({
            "id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "post_content": "hello",
            "user_id": "947979fc-1baf-4f22-8880-87773136cd46",
            "created_at": "2024-05-01T10:00:00Z"
        })
    }

    #[test]
    fn test_decode_insert() {
        let raw = RawChange {
            table: Table::Posts,
            kind: ChangeKind::Insert,
            record: Some(post_json()),
            old_record: None,
        };
        let event = raw.decode::<Post>().unwrap();
        assert!(matches!(event, ChangeEvent::Inserted(ref p) if p.post_content == "hello"));
        assert_eq!(event.kind(), ChangeKind::Insert);
    }

    #[test]
    fn test_decode_delete_reads_old_record_id() {
        let raw = RawChange {
            table: Table::Posts,
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({ "id": "01890a5d-ac96-774b-bcce-b302099a8057" })),
        };
        let event = raw.decode::<Post>().unwrap();
        assert_eq!(event.id().to_string(), "01890a5d-ac96-774b-bcce-b302099a8057");
    }

    #[test]
    fn test_decode_rejects_wrong_table() {
        let raw = RawChange {
            table: Table::Posts,
            kind: ChangeKind::Insert,
            record: Some(post_json()),
            old_record: None,
        };
        assert!(raw.decode::<Comment>().is_err());
    }

    #[test]
    fn test_decode_rejects_nil_id() {
        let mut record = post_json();
        record["id"] = json!("00000000-0000-0000-0000-000000000000");
        let raw = RawChange {
            table: Table::Posts,
            kind: ChangeKind::Update,
            record: Some(record),
            old_record: None,
        };
        assert!(matches!(raw.decode::<Post>(), Err(RemoteError::Decode { .. })));
    }

    #[test]
    fn test_raw_change_wire_names() {
        let raw: RawChange = serde_json::from_value(json!({
            "table": "comments",
            "type": "DELETE",
            "old_record": { "id": "01890a5d-ac96-774b-bcce-b302099a8057" }
        }))
        .unwrap();
        assert_eq!(raw.table, Table::Comments);
        assert_eq!(raw.kind, ChangeKind::Delete);
    }
}
