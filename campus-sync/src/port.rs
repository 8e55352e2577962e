//! The remote data port consumed by every collection.

use crate::Subscription;
use async_trait::async_trait;
use campus_core::{AuthUser, EntityId, Filter, PageRequest, Record, RemoteError};

/// CRUD-over-tables plus change subscriptions on a hosted data service.
///
/// The table is taken from `T::TABLE`. Implementations decode and validate
/// every record they hand back (`Record::validate`), so the sync layer only
/// ever sees well-formed records.
#[async_trait]
pub trait RemoteDataPort: Send + Sync {
    /// Fetch one window of a table.
    async fn fetch_page<T: Record>(&self, request: &PageRequest) -> Result<Vec<T>, RemoteError>;

    /// Fetch a single row by id. `Ok(None)` when no row matches.
    async fn fetch_record<T: Record>(&self, id: EntityId) -> Result<Option<T>, RemoteError>;

    /// Insert a row and return the canonical record, including server
    /// generated `id` and `created_at`.
    async fn insert_record<T: Record>(&self, draft: &T::Draft) -> Result<T, RemoteError>;

    async fn update_record<T: Record>(
        &self,
        id: EntityId,
        patch: &T::Patch,
    ) -> Result<(), RemoteError>;

    async fn delete_record<T: Record>(&self, id: EntityId) -> Result<(), RemoteError>;

    /// Subscribe to change events for a table, optionally scoped by a filter.
    ///
    /// The returned [`Subscription`] releases the remote subscription when
    /// it is unsubscribed or dropped.
    async fn subscribe<T: Record>(
        &self,
        filter: Option<Filter>,
    ) -> Result<Subscription<T>, RemoteError>;

    /// The signed-in account, if any.
    async fn current_user(&self) -> Option<AuthUser>;
}
