//! Async driver that runs [`CacheState`] against a [`RemoteDataPort`].

use crate::cache::{CacheState, ChangeApplied, CollectionStatus, Direction, PageSnapshot};
use crate::port::RemoteDataPort;
use crate::subscription::Subscription;
use campus_core::{ChangeEvent, EntityId, FetchError, Filter, Record, RemoteError, SyncError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// A paginated, optimistically-synced view of one remote table.
///
/// The cache lock is never held across an `.await`, so loads and mutations
/// on the same collection may overlap. Their results are reconciled in
/// arrival order.
pub struct PagedSyncedCollection<T: Record, P: RemoteDataPort> {
    port: Arc<P>,
    state: Mutex<CacheState<T>>,
    subscription: tokio::sync::Mutex<Option<Subscription<T>>>,
    closing: watch::Sender<bool>,
}

impl<T: Record, P: RemoteDataPort> PagedSyncedCollection<T, P> {
    /// Create the collection and subscribe to its table.
    pub async fn open(port: Arc<P>, limit: u32, filter: Option<Filter>) -> Result<Self, SyncError> {
        if limit == 0 {
            return Err(campus_core::ValidationError::InvalidLimit { limit }.into());
        }
        let subscription = port.subscribe::<T>(filter.clone()).await?;
        debug!(table = %T::TABLE, subscription = %subscription.id(), limit, "collection opened");
        Ok(Self {
            port,
            state: Mutex::new(CacheState::new(limit, filter)),
            subscription: tokio::sync::Mutex::new(Some(subscription)),
            closing: watch::channel(false).0,
        })
    }

    /// Release the subscription. Buffered events are dropped and a pending
    /// [`next_change`](Self::next_change) returns `None`.
    pub async fn close(&self) {
        self.closing.send_replace(true);
        if let Some(subscription) = self.subscription.lock().await.take() {
            debug!(table = %T::TABLE, subscription = %subscription.id(), "collection closed");
            subscription.unsubscribe();
        }
    }

    pub async fn is_open(&self) -> bool {
        self.subscription.lock().await.is_some()
    }

    pub fn port(&self) -> &Arc<P> {
        &self.port
    }

    fn state(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn status(&self) -> CollectionStatus {
        self.state().status()
    }

    pub fn page(&self) -> u32 {
        self.state().page()
    }

    pub fn records(&self) -> Vec<T> {
        self.state().records().to_vec()
    }

    pub fn get(&self, id: EntityId) -> Option<T> {
        self.state().get(id).cloned()
    }

    pub fn is_last_page(&self) -> bool {
        self.state().is_last_page()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending_count()
    }

    pub fn snapshot(&self) -> PageSnapshot<T> {
        self.state().snapshot()
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Fetch `page` and replace the cache with it.
    pub async fn load(&self, page: u32, limit: u32) -> Result<PageSnapshot<T>, FetchError> {
        let ticket = self.state().begin_load(page, limit)?;
        debug!(table = %T::TABLE, page, limit, "loading page");

        let result = self
            .port
            .fetch_page::<T>(ticket.request())
            .await
            .and_then(validate_all);

        let outcome = self.state().complete_load(ticket, result);
        match &outcome {
            Ok(snapshot) => debug!(
                table = %T::TABLE,
                page,
                count = snapshot.records.len(),
                last_page = snapshot.is_last_page,
                "page loaded"
            ),
            Err(FetchError::Superseded { page }) => {
                debug!(table = %T::TABLE, page, "superseded fetch dropped")
            }
            Err(err) => debug!(table = %T::TABLE, page, error = %err, "page load failed"),
        }
        outcome
    }

    /// Refetch the page the collection is on.
    pub async fn refresh(&self) -> Result<PageSnapshot<T>, FetchError> {
        let (page, limit) = {
            let state = self.state();
            (state.page(), state.limit())
        };
        self.load(page, limit).await
    }

    /// Move the page cursor without fetching.
    pub fn change_page(&self, direction: Direction) -> u32 {
        self.state().change_page(direction)
    }

    /// Move the page cursor and fetch the new page.
    pub async fn navigate(&self, direction: Direction) -> Result<PageSnapshot<T>, FetchError> {
        let (before, after, limit) = {
            let mut state = self.state();
            let before = state.page();
            let after = state.change_page(direction);
            (before, after, state.limit())
        };
        if before == after && self.status() == CollectionStatus::Ready {
            return Ok(self.snapshot());
        }
        self.load(after, limit).await
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Look a record up in the window, falling back to the remote.
    ///
    /// Remote hits are returned but not placed in the window.
    pub async fn find(&self, id: EntityId) -> Result<Option<T>, SyncError> {
        if let Some(cached) = self.get(id) {
            return Ok(Some(cached));
        }
        let found = self.port.fetch_record::<T>(id).await?;
        Ok(found.map(validated).transpose()?)
    }

    /// Create a record. It is visible on page 1 before the remote answers.
    pub async fn insert(&self, draft: T::Draft) -> Result<T, SyncError> {
        let ticket = self.state().begin_insert(draft)?;
        debug!(table = %T::TABLE, token = %ticket.token, "insert issued");

        let result = self
            .port
            .insert_record::<T>(&ticket.draft)
            .await
            .and_then(validated);

        let outcome = self.state().complete_insert(ticket.token, result);
        log_ack(T::TABLE, "insert", ticket.token, outcome.as_ref().err());
        outcome
    }

    /// Patch a cached record. Reverted if the remote rejects it.
    pub async fn update(&self, id: EntityId, patch: T::Patch) -> Result<T, SyncError> {
        let ticket = self.state().begin_update(id, patch)?;
        debug!(table = %T::TABLE, token = %ticket.token, %id, "update issued");

        let result = self.port.update_record::<T>(id, &ticket.patch).await;

        let outcome = self.state().complete_update(ticket.token, result);
        log_ack(T::TABLE, "update", ticket.token, outcome.as_ref().err());
        outcome
    }

    /// Delete a cached record. Put back in place if the remote rejects it.
    pub async fn remove(&self, id: EntityId) -> Result<(), SyncError> {
        let ticket = self.state().begin_remove(id)?;
        debug!(table = %T::TABLE, token = %ticket.token, %id, "remove issued");

        let result = self.port.delete_record::<T>(id).await;

        let outcome = self.state().complete_remove(ticket.token, result);
        log_ack(T::TABLE, "remove", ticket.token, outcome.as_ref().err());
        outcome
    }

    // ========================================================================
    // PUSH NOTIFICATIONS
    // ========================================================================

    pub fn apply_external_change(&self, event: ChangeEvent<T>) -> ChangeApplied {
        let id = event.id();
        let applied = self.state().apply_external_change(event);
        if applied == ChangeApplied::Discarded {
            debug!(table = %T::TABLE, %id, "change event discarded");
        }
        applied
    }

    /// Apply every buffered event. Returns how many were taken off the feed.
    pub async fn drain_events(&self) -> usize {
        let mut guard = self.subscription.lock().await;
        let Some(subscription) = guard.as_mut() else {
            return 0;
        };
        let mut drained = 0;
        while let Some(event) = subscription.try_next() {
            self.apply_external_change(event);
            drained += 1;
        }
        drained
    }

    /// Wait for one event and apply it. `None` once the feed is closed.
    pub async fn next_change(&self) -> Option<ChangeApplied> {
        let mut closing = self.closing.subscribe();
        if *closing.borrow() {
            return None;
        }
        let event = {
            let mut guard = self.subscription.lock().await;
            let subscription = guard.as_mut()?;
            tokio::select! {
                event = subscription.next() => event?,
                _ = closing.changed() => return None,
            }
        };
        Some(self.apply_external_change(event))
    }
}

impl<T: Record, P: RemoteDataPort> std::fmt::Debug for PagedSyncedCollection<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("PagedSyncedCollection")
            .field("table", &T::TABLE)
            .field("status", &state.status())
            .field("page", &state.page())
            .field("len", &state.len())
            .finish()
    }
}

fn validated<T: Record>(record: T) -> Result<T, RemoteError> {
    record
        .validate()
        .map_err(|err| RemoteError::decode(format!("{} record rejected: {}", T::TABLE, err)))?;
    Ok(record)
}

fn validate_all<T: Record>(records: Vec<T>) -> Result<Vec<T>, RemoteError> {
    records.into_iter().map(validated).collect()
}

fn log_ack(
    table: campus_core::Table,
    op: &'static str,
    token: crate::cache::CorrelationToken,
    err: Option<&SyncError>,
) {
    match err {
        None => debug!(%table, op, %token, "mutation acknowledged"),
        Some(err) => debug!(%table, op, %token, error = %err, "mutation rolled back"),
    }
}
