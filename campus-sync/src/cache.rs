//! Sans-IO cache state for one paged collection.
//!
//! Every operation is split into a `begin_*` half that applies the local
//! (optimistic) effect and returns a ticket, and a `complete_*` half that
//! reconciles the remote result. Between the two halves any other call may
//! run, which is how concurrent in-flight requests are modelled.

use campus_core::{
    new_entity_id, ChangeEvent, EntityId, FetchError, Filter, PageRequest, Record, RemoteError,
    SyncError,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// Lifecycle of the cached window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Nothing has been loaded yet.
    Unloaded,
    /// A fetch is in flight. A previously loaded window stays readable.
    Loading,
    /// A window is materialized and accepts mutations.
    Ready,
}

/// Page navigation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Links a local mutation to its eventual confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A fetch that has been started but not yet reconciled.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    page: u32,
    fence: u64,
    request: PageRequest,
}

impl LoadTicket {
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.request.limit
    }

    /// Request to send to the remote.
    pub fn request(&self) -> &PageRequest {
        &self.request
    }
}

#[derive(Debug, Clone)]
pub struct InsertTicket<T: Record> {
    pub token: CorrelationToken,
    pub draft: T::Draft,
    /// The optimistic record, shown at the head of page 1.
    pub provisional: T,
}

#[derive(Debug, Clone)]
pub struct UpdateTicket<T: Record> {
    pub token: CorrelationToken,
    pub id: EntityId,
    pub patch: T::Patch,
}

#[derive(Debug, Clone)]
pub struct RemoveTicket {
    pub token: CorrelationToken,
    pub id: EntityId,
}

/// Read-only copy of the materialized window.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot<T> {
    pub page: u32,
    pub limit: u32,
    pub records: Vec<T>,
    /// The last fetch returned fewer than `limit` records.
    pub is_last_page: bool,
    /// Mutations issued but not yet acknowledged.
    pub pending: usize,
}

/// Which branch of the merge policy a change event took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeApplied {
    /// The record was in the window and has been replaced in place.
    Replaced,
    /// A new record was placed at the head of page 1.
    Prepended,
    /// The record was removed from the window.
    Removed,
    /// The event does not touch the current window.
    Discarded,
}

// ============================================================================
// PENDING MUTATIONS
// ============================================================================

#[derive(Debug, Clone)]
enum Pending<T: Record> {
    Insert {
        provisional_id: EntityId,
        epoch: u64,
        visible: bool,
    },
    Update {
        id: EntityId,
        snapshot: T,
        patch: T::Patch,
        epoch: u64,
        /// A confirmed value for the record arrived after this update was issued.
        superseded: bool,
        /// Acknowledged, kept only while an earlier update on the same record is unresolved.
        acknowledged: bool,
    },
    Remove {
        id: EntityId,
        snapshot: T,
        position: usize,
        epoch: u64,
        /// The remote already reported the delete.
        confirmed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    page: u32,
    limit: u32,
}

// ============================================================================
// CACHE STATE
// ============================================================================

/// Materialized window of a remote collection plus its pending mutations.
#[derive(Debug, Clone)]
pub struct CacheState<T: Record> {
    status: CollectionStatus,
    /// Status to fall back to when the in-flight fetch fails or is abandoned.
    settled: CollectionStatus,
    /// Page the caller is navigating to.
    page: u32,
    limit: u32,
    filter: Option<Filter>,
    /// Page and limit the records below belong to.
    window: Option<Window>,
    records: Vec<T>,
    last_fetch_len: usize,
    /// Bumped by every load and page change; stale fetch results are dropped.
    fence: u64,
    /// Bumped whenever a fetch replaces the records wholesale.
    epoch: u64,
    next_token: u64,
    pending: BTreeMap<CorrelationToken, Pending<T>>,
    /// Ids deleted remotely while inserts were pending.
    tombstones: HashSet<EntityId>,
}

impl<T: Record> CacheState<T> {
    pub fn new(limit: u32, filter: Option<Filter>) -> Self {
        Self {
            status: CollectionStatus::Unloaded,
            settled: CollectionStatus::Unloaded,
            page: 1,
            limit,
            filter,
            window: None,
            records: Vec::new(),
            last_fetch_len: 0,
            fence: 0,
            epoch: 0,
            next_token: 0,
            pending: BTreeMap::new(),
            tombstones: HashSet::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------------

    pub fn status(&self) -> CollectionStatus {
        self.status
    }

    /// Page the collection is on or navigating to.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Page whose records are currently materialized.
    pub fn loaded_page(&self) -> Option<u32> {
        self.window.map(|w| w.page)
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the last fetch came back short, meaning there is no next page.
    pub fn is_last_page(&self) -> bool {
        self.window
            .map(|w| self.last_fetch_len < w.limit as usize)
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Tokens of mutations awaiting reconciliation, oldest first.
    pub fn reconciling(&self) -> Vec<CorrelationToken> {
        self.pending.keys().copied().collect()
    }

    pub fn snapshot(&self) -> PageSnapshot<T> {
        let window = self.window.unwrap_or(Window {
            page: self.page,
            limit: self.limit,
        });
        PageSnapshot {
            page: window.page,
            limit: window.limit,
            records: self.records.clone(),
            is_last_page: self.is_last_page(),
            pending: self.pending.len(),
        }
    }

    // ------------------------------------------------------------------------
    // Loading and navigation
    // ------------------------------------------------------------------------

    /// Start fetching `page`. Any fetch already in flight is superseded.
    pub fn begin_load(&mut self, page: u32, limit: u32) -> Result<LoadTicket, FetchError> {
        let request = PageRequest::for_page(page, limit)?.with_filter(self.filter.clone());
        if self.status != CollectionStatus::Loading {
            self.settled = self.status;
        }
        self.status = CollectionStatus::Loading;
        self.page = page;
        self.limit = limit;
        self.fence += 1;
        Ok(LoadTicket {
            page,
            fence: self.fence,
            request,
        })
    }

    /// Reconcile a fetch result.
    ///
    /// A superseded ticket leaves the cache untouched. A failed fetch keeps
    /// the previous window and reports the error.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<T>, RemoteError>,
    ) -> Result<PageSnapshot<T>, FetchError> {
        if ticket.fence != self.fence {
            tracing::trace!(page = ticket.page, "discarding superseded fetch");
            return Err(FetchError::Superseded { page: ticket.page });
        }

        match result {
            Ok(fetched) => {
                let limit = ticket.limit();
                self.last_fetch_len = fetched.len();
                let mut seen = HashSet::with_capacity(fetched.len());
                self.records = fetched
                    .into_iter()
                    .filter(|r| seen.insert(r.id()))
                    .take(limit as usize)
                    .collect();
                self.window = Some(Window {
                    page: ticket.page,
                    limit,
                });
                self.epoch += 1;
                self.tombstones.clear();
                self.status = CollectionStatus::Ready;
                self.settled = CollectionStatus::Ready;
                Ok(self.snapshot())
            }
            Err(err) => {
                self.status = self.settled;
                if let Some(window) = self.window {
                    self.page = window.page;
                    self.limit = window.limit;
                }
                Err(FetchError::Remote(err))
            }
        }
    }

    /// Move the page cursor. `Previous` on page 1 is a no-op; `Next` is
    /// always allowed since only a short fetch reveals the last page.
    ///
    /// Moving invalidates any fetch still in flight.
    pub fn change_page(&mut self, direction: Direction) -> u32 {
        let target = match direction {
            Direction::Next => self.page.saturating_add(1),
            Direction::Previous if self.page > 1 => self.page - 1,
            Direction::Previous => return self.page,
        };
        self.page = target;
        self.fence += 1;
        if self.status == CollectionStatus::Loading {
            self.status = self.settled;
        }
        target
    }

    // ------------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------------

    /// Validate a draft and show its optimistic record at the head of page 1.
    pub fn begin_insert(&mut self, draft: T::Draft) -> Result<InsertTicket<T>, SyncError> {
        T::validate_draft(&draft)?;
        self.ensure_ready()?;

        let token = self.issue_token();
        let provisional = T::materialize(new_entity_id(), Utc::now(), &draft);
        let visible = self.on_first_page();
        if visible {
            self.records.insert(0, provisional.clone());
        }
        self.pending.insert(
            token,
            Pending::Insert {
                provisional_id: provisional.id(),
                epoch: self.epoch,
                visible,
            },
        );
        Ok(InsertTicket {
            token,
            draft,
            provisional,
        })
    }

    /// Swap the optimistic record for the canonical one, or roll it back.
    pub fn complete_insert(
        &mut self,
        token: CorrelationToken,
        result: Result<T, RemoteError>,
    ) -> Result<T, SyncError> {
        let Some(Pending::Insert {
            provisional_id,
            epoch,
            visible,
        }) = self.pending.remove(&token)
        else {
            return result.map_err(SyncError::from);
        };
        let current = visible && epoch == self.epoch;

        match result {
            Ok(canonical) => {
                if current {
                    let echoed = self.position(canonical.id()).is_some();
                    let deleted = self.tombstones.contains(&canonical.id());
                    match self.position(provisional_id) {
                        Some(pos) if echoed || deleted => {
                            self.records.remove(pos);
                        }
                        Some(pos) => self.records[pos] = canonical.clone(),
                        None => {}
                    }
                    self.trim_overflow();
                }
                self.forget_tombstones();
                Ok(canonical)
            }
            Err(err) => {
                if current {
                    if let Some(pos) = self.position(provisional_id) {
                        self.records.remove(pos);
                    }
                }
                self.forget_tombstones();
                Err(SyncError::Remote(err))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Apply a patch to the cached record, remembering the pre-patch snapshot.
    pub fn begin_update(
        &mut self,
        id: EntityId,
        patch: T::Patch,
    ) -> Result<UpdateTicket<T>, SyncError> {
        T::validate_patch(&patch)?;
        self.ensure_ready()?;
        self.ensure_confirmed(id)?;
        let pos = self.position(id).ok_or(SyncError::NotFound { id })?;

        let token = self.issue_token();
        let snapshot = self.records[pos].clone();
        self.records[pos].apply_patch(&patch);
        self.pending.insert(
            token,
            Pending::Update {
                id,
                snapshot,
                patch: patch.clone(),
                epoch: self.epoch,
                superseded: false,
                acknowledged: false,
            },
        );
        Ok(UpdateTicket { token, id, patch })
    }

    /// Keep the patched value on success; on failure restore the snapshot and
    /// re-apply any later updates to the same record that are still pending.
    pub fn complete_update(
        &mut self,
        token: CorrelationToken,
        result: Result<(), RemoteError>,
    ) -> Result<T, SyncError> {
        let Some(Pending::Update {
            id,
            snapshot,
            patch,
            epoch,
            superseded,
            ..
        }) = self.pending.get(&token).cloned()
        else {
            result?;
            return Err(SyncError::UnknownMutation {
                token: token.value(),
            });
        };

        match result {
            Ok(()) => {
                if self.has_unresolved_update_before(id, token) {
                    if let Some(Pending::Update { acknowledged, .. }) =
                        self.pending.get_mut(&token)
                    {
                        *acknowledged = true;
                    }
                } else {
                    self.pending.remove(&token);
                }
                self.collect_acknowledged(id);
                let confirmed = self.get(id).cloned().unwrap_or_else(|| {
                    let mut value = snapshot;
                    value.apply_patch(&patch);
                    value
                });
                Ok(confirmed)
            }
            Err(err) => {
                self.pending.remove(&token);
                if !superseded && epoch == self.epoch {
                    self.replay_updates_after(id, token, snapshot);
                }
                self.collect_acknowledged(id);
                Err(SyncError::Remote(err))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------------

    /// Take the record out of the window, remembering where it was.
    pub fn begin_remove(&mut self, id: EntityId) -> Result<RemoveTicket, SyncError> {
        self.ensure_ready()?;
        self.ensure_confirmed(id)?;
        let position = self.position(id).ok_or(SyncError::NotFound { id })?;

        let token = self.issue_token();
        let snapshot = self.records.remove(position);
        self.pending.insert(
            token,
            Pending::Remove {
                id,
                snapshot,
                position,
                epoch: self.epoch,
                confirmed: false,
            },
        );
        Ok(RemoveTicket { token, id })
    }

    /// On failure put the record back at its prior position.
    pub fn complete_remove(
        &mut self,
        token: CorrelationToken,
        result: Result<(), RemoteError>,
    ) -> Result<(), SyncError> {
        let Some(Pending::Remove {
            id,
            snapshot,
            position,
            epoch,
            confirmed,
        }) = self.pending.remove(&token)
        else {
            return result.map_err(SyncError::from);
        };

        if let Err(err) = result {
            if !confirmed && epoch == self.epoch && self.position(id).is_none() {
                let at = position.min(self.records.len());
                self.records.insert(at, snapshot);
                self.trim_overflow();
            }
            return Err(SyncError::Remote(err));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // External changes
    // ------------------------------------------------------------------------

    /// Merge a pushed change event into the window. Idempotent.
    pub fn apply_external_change(&mut self, event: ChangeEvent<T>) -> ChangeApplied {
        if self.window.is_none() {
            return ChangeApplied::Discarded;
        }

        match event {
            ChangeEvent::Inserted(record) => {
                if let Some(pos) = self.position(record.id()) {
                    self.replace_confirmed(pos, record);
                    return ChangeApplied::Replaced;
                }
                if !self.in_scope(&record) || !self.on_first_page() {
                    tracing::trace!(id = %record.id(), "insert outside current window");
                    return ChangeApplied::Discarded;
                }
                self.records.insert(0, record);
                self.trim_overflow();
                ChangeApplied::Prepended
            }
            ChangeEvent::Updated(record) => {
                let id = record.id();
                match self.position(id) {
                    Some(pos) if self.in_scope(&record) => {
                        self.replace_confirmed(pos, record);
                        ChangeApplied::Replaced
                    }
                    Some(pos) => {
                        self.records.remove(pos);
                        self.supersede_updates(id, &record);
                        ChangeApplied::Removed
                    }
                    None => {
                        self.refresh_removed_snapshot(record);
                        tracing::trace!(%id, "update outside current window");
                        ChangeApplied::Discarded
                    }
                }
            }
            ChangeEvent::Deleted(id) => {
                self.confirm_removal(id);
                match self.position(id) {
                    Some(pos) => {
                        self.records.remove(pos);
                        ChangeApplied::Removed
                    }
                    None => ChangeApplied::Discarded,
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn ensure_ready(&self) -> Result<(), SyncError> {
        if self.status != CollectionStatus::Ready {
            return Err(SyncError::NotReady);
        }
        Ok(())
    }

    /// Provisional ids exist only locally; the remote has no row to mutate.
    fn ensure_confirmed(&self, id: EntityId) -> Result<(), SyncError> {
        let provisional = self.pending.values().any(|p| {
            matches!(p, Pending::Insert { provisional_id, .. } if *provisional_id == id)
        });
        if provisional {
            return Err(SyncError::Unconfirmed { id });
        }
        Ok(())
    }

    fn issue_token(&mut self) -> CorrelationToken {
        self.next_token += 1;
        CorrelationToken(self.next_token)
    }

    fn position(&self, id: EntityId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    fn on_first_page(&self) -> bool {
        self.window.map(|w| w.page == 1).unwrap_or(false)
    }

    fn in_scope(&self, record: &T) -> bool {
        self.filter.as_ref().map(|f| f.matches(record)).unwrap_or(true)
    }

    /// Optimistic inserts still shown in the window.
    fn visible_provisional_count(&self) -> usize {
        self.pending
            .values()
            .filter(|p| match p {
                Pending::Insert {
                    provisional_id,
                    epoch,
                    visible,
                } => *visible && *epoch == self.epoch && self.position(*provisional_id).is_some(),
                _ => false,
            })
            .count()
    }

    /// Evict from the tail so the window holds at most `limit` confirmed records.
    fn trim_overflow(&mut self) {
        let Some(window) = self.window else {
            return;
        };
        let allowed = window.limit as usize + self.visible_provisional_count();
        if self.records.len() > allowed {
            self.records.truncate(allowed);
        }
    }

    fn replace_confirmed(&mut self, pos: usize, record: T) {
        let mut merged = self.records[pos].clone();
        merged.merge_confirmed(record);
        self.supersede_updates(merged.id(), &merged);
        self.records[pos] = merged;
    }

    /// A confirmed value wins over every optimistic patch issued before it.
    fn supersede_updates(&mut self, id: EntityId, confirmed: &T) {
        for pending in self.pending.values_mut() {
            if let Pending::Update {
                id: pending_id,
                snapshot,
                superseded,
                ..
            } = pending
            {
                if *pending_id == id {
                    *snapshot = confirmed.clone();
                    *superseded = true;
                }
            }
        }
    }

    fn refresh_removed_snapshot(&mut self, record: T) {
        for pending in self.pending.values_mut() {
            if let Pending::Remove { id, snapshot, .. } = pending {
                if *id == record.id() {
                    *snapshot = record.clone();
                }
            }
        }
    }

    fn confirm_removal(&mut self, deleted: EntityId) {
        let mut inserts_pending = false;
        for pending in self.pending.values_mut() {
            match pending {
                Pending::Remove { id, confirmed, .. } if *id == deleted => *confirmed = true,
                Pending::Insert { .. } => inserts_pending = true,
                _ => {}
            }
        }
        if inserts_pending {
            self.tombstones.insert(deleted);
        }
    }

    fn forget_tombstones(&mut self) {
        let inserts_pending = self
            .pending
            .values()
            .any(|p| matches!(p, Pending::Insert { .. }));
        if !inserts_pending {
            self.tombstones.clear();
        }
    }

    fn has_unresolved_update_before(&self, id: EntityId, token: CorrelationToken) -> bool {
        self.pending.range(..token).any(|(_, p)| {
            matches!(p, Pending::Update { id: pid, acknowledged: false, .. } if *pid == id)
        })
    }

    /// Drop acknowledged updates that no longer have an unresolved predecessor.
    fn collect_acknowledged(&mut self, id: EntityId) {
        let chain: Vec<(CorrelationToken, bool)> = self
            .pending
            .iter()
            .filter_map(|(token, p)| match p {
                Pending::Update {
                    id: pid,
                    acknowledged,
                    ..
                } if *pid == id => Some((*token, *acknowledged)),
                _ => None,
            })
            .collect();
        for (token, acknowledged) in chain {
            if !acknowledged {
                break;
            }
            self.pending.remove(&token);
        }
    }

    /// Rebuild the visible value from `base` plus every later live patch.
    fn replay_updates_after(&mut self, id: EntityId, token: CorrelationToken, base: T) {
        let epoch = self.epoch;
        let mut value = base;
        for (_, pending) in self.pending.range_mut(token..) {
            if let Pending::Update {
                id: pid,
                snapshot,
                patch,
                epoch: pending_epoch,
                superseded: false,
                ..
            } = pending
            {
                if *pid == id && *pending_epoch == epoch {
                    *snapshot = value.clone();
                    value.apply_patch(patch);
                }
            }
        }
        if let Some(pos) = self.position(id) {
            self.records[pos] = value;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::{AuthorSummary, Course, CoursePatch, NewCourse, Post, ValidationError};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn course(n: i64, title: &str) -> Course {
        Course {
            id: new_entity_id(),
            title: title.to_string(),
            content: format!("content {}", n),
            user_id: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(n),
            registered_users: None,
        }
    }

    fn draft(title: &str) -> NewCourse {
        NewCourse {
            title: title.to_string(),
            content: "body".to_string(),
            user_id: None,
        }
    }

    fn title_patch(title: &str) -> CoursePatch {
        CoursePatch {
            title: Some(title.to_string()),
            content: None,
        }
    }

    fn ready(page: u32, limit: u32, records: Vec<Course>) -> CacheState<Course> {
        let mut state = CacheState::new(limit, None);
        let ticket = state.begin_load(page, limit).unwrap();
        state.complete_load(ticket, Ok(records)).unwrap();
        state
    }

    fn titles(state: &CacheState<Course>) -> Vec<String> {
        state.records().iter().map(|c| c.title.clone()).collect()
    }

    fn rejected() -> RemoteError {
        RemoteError::rejected(500, "boom")
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    #[test]
    fn test_short_page_is_last_page() {
        let state = ready(1, 5, vec![course(3, "c"), course(2, "b"), course(1, "a")]);
        assert_eq!(state.len(), 3);
        assert!(state.is_last_page());
        assert_eq!(state.status(), CollectionStatus::Ready);
    }

    #[test]
    fn test_full_page_is_not_last_page() {
        let state = ready(1, 2, vec![course(2, "b"), course(1, "a")]);
        assert!(!state.is_last_page());
    }

    #[test]
    fn test_invalid_page_and_limit_rejected() {
        let mut state: CacheState<Course> = CacheState::new(5, None);
        assert_eq!(
            state.begin_load(0, 5).unwrap_err(),
            FetchError::Invalid(ValidationError::InvalidPage { page: 0 })
        );
        assert_eq!(
            state.begin_load(1, 0).unwrap_err(),
            FetchError::Invalid(ValidationError::InvalidLimit { limit: 0 })
        );
        assert_eq!(state.status(), CollectionStatus::Unloaded);
    }

    #[test]
    fn test_failed_fetch_keeps_last_good_window() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_load(2, 5).unwrap();
        assert_eq!(state.status(), CollectionStatus::Loading);
        let err = state.complete_load(ticket, Err(rejected())).unwrap_err();
        assert!(matches!(err, FetchError::Remote(_)));
        assert_eq!(titles(&state), vec!["a"]);
        assert_eq!(state.status(), CollectionStatus::Ready);
        assert_eq!(state.page(), 1);
    }

    #[test]
    fn test_failed_first_fetch_returns_to_unloaded() {
        let mut state: CacheState<Course> = CacheState::new(5, None);
        let ticket = state.begin_load(1, 5).unwrap();
        assert!(state.complete_load(ticket, Err(rejected())).is_err());
        assert_eq!(state.status(), CollectionStatus::Unloaded);
    }

    #[test]
    fn test_fetch_for_superseded_page_is_discarded() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let stale = state.begin_load(1, 5).unwrap();
        state.change_page(Direction::Next);
        let fresh = state.begin_load(state.page(), 5).unwrap();

        let err = state
            .complete_load(stale, Ok(vec![course(9, "stale")]))
            .unwrap_err();
        assert_eq!(err, FetchError::Superseded { page: 1 });
        assert_eq!(titles(&state), vec!["a"]);

        state.complete_load(fresh, Ok(vec![course(0, "p2")])).unwrap();
        assert_eq!(titles(&state), vec!["p2"]);
        assert_eq!(state.loaded_page(), Some(2));
    }

    #[test]
    fn test_page_change_abandons_in_flight_load() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_load(1, 5).unwrap();
        state.change_page(Direction::Next);
        assert_eq!(state.status(), CollectionStatus::Ready);
        assert!(state.complete_load(ticket, Ok(vec![])).is_err());
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn test_fetched_duplicates_collapsed() {
        let a = course(1, "a");
        let state = ready(1, 5, vec![a.clone(), a.clone()]);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_previous_is_noop_on_first_page() {
        let mut state: CacheState<Course> = CacheState::new(5, None);
        assert_eq!(state.change_page(Direction::Previous), 1);
        assert_eq!(state.change_page(Direction::Next), 2);
        assert_eq!(state.change_page(Direction::Next), 3);
        assert_eq!(state.change_page(Direction::Previous), 2);
    }

    // ------------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------------

    #[test]
    fn test_empty_draft_fails_before_touching_cache() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let err = state.begin_insert(draft("")).unwrap_err();
        assert_eq!(err, SyncError::Validation(ValidationError::missing("title")));
        assert_eq!(titles(&state), vec!["a"]);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_mutation_rejected_before_load() {
        let mut state: CacheState<Course> = CacheState::new(5, None);
        assert_eq!(state.begin_insert(draft("x")).unwrap_err(), SyncError::NotReady);
    }

    #[test]
    fn test_optimistic_insert_shown_on_first_page() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        assert_eq!(titles(&state), vec!["new", "a"]);
        assert_eq!(state.records()[0].id, ticket.provisional.id);
        assert_eq!(state.reconciling(), vec![ticket.token]);
    }

    #[test]
    fn test_optimistic_insert_hidden_off_first_page() {
        let mut state = ready(2, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        assert_eq!(titles(&state), vec!["a"]);
        let mut canonical = ticket.provisional.clone();
        canonical.id = new_entity_id();
        state.complete_insert(ticket.token, Ok(canonical)).unwrap();
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn test_insert_confirmation_replaces_by_token() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let mut canonical = ticket.provisional.clone();
        canonical.id = new_entity_id();
        state.complete_insert(ticket.token, Ok(canonical.clone())).unwrap();

        assert_eq!(state.records()[0], canonical);
        assert!(state.get(ticket.provisional.id).is_none());
        assert_eq!(state.pending_count(), 0);

        // The echo arriving afterwards replaces in place.
        assert_eq!(
            state.apply_external_change(ChangeEvent::Inserted(canonical.clone())),
            ChangeApplied::Replaced
        );
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_echo_before_response_leaves_one_record() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let mut canonical = ticket.provisional.clone();
        canonical.id = new_entity_id();

        assert_eq!(
            state.apply_external_change(ChangeEvent::Inserted(canonical.clone())),
            ChangeApplied::Prepended
        );
        state.complete_insert(ticket.token, Ok(canonical.clone())).unwrap();

        let matching: Vec<_> = state.records().iter().filter(|c| c.title == "new").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].id, canonical.id);
    }

    #[test]
    fn test_insert_deleted_before_response_not_resurrected() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let mut canonical = ticket.provisional.clone();
        canonical.id = new_entity_id();

        state.apply_external_change(ChangeEvent::Inserted(canonical.clone()));
        state.apply_external_change(ChangeEvent::Deleted(canonical.id));
        state.complete_insert(ticket.token, Ok(canonical)).unwrap();

        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn test_failed_insert_rolled_back() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let err = state.complete_insert(ticket.token, Err(rejected())).unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert_eq!(titles(&state), vec!["a"]);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_confirmed_insert_evicts_tail_on_full_page() {
        let mut state = ready(1, 2, vec![course(2, "b"), course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        assert_eq!(state.len(), 3);
        let mut canonical = ticket.provisional.clone();
        canonical.id = new_entity_id();
        state.complete_insert(ticket.token, Ok(canonical)).unwrap();
        assert_eq!(titles(&state), vec!["new", "b"]);
    }

    #[test]
    fn test_insert_after_reload_does_not_touch_new_window() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let reload = state.begin_load(1, 5).unwrap();
        state.complete_load(reload, Ok(vec![course(2, "b")])).unwrap();

        state.complete_insert(ticket.token, Err(rejected())).unwrap_err();
        assert_eq!(titles(&state), vec!["b"]);
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    #[test]
    fn test_successful_update_keeps_patch() {
        let al = course(1, "Al");
        let mut state = ready(1, 5, vec![al.clone()]);
        let ticket = state.begin_update(al.id, title_patch("Bo")).unwrap();
        assert_eq!(titles(&state), vec!["Bo"]);
        let confirmed = state.complete_update(ticket.token, Ok(())).unwrap();
        assert_eq!(confirmed.title, "Bo");
        assert_eq!(titles(&state), vec!["Bo"]);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_failed_update_restores_snapshot() {
        let al = course(1, "Al");
        let before = vec![al.clone(), course(0, "x")];
        let mut state = ready(1, 5, before.clone());
        let ticket = state.begin_update(al.id, title_patch("Bo")).unwrap();
        state.complete_update(ticket.token, Err(rejected())).unwrap_err();
        assert_eq!(state.records(), before.as_slice());
    }

    #[test]
    fn test_update_of_unknown_record_is_not_found() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let id = new_entity_id();
        assert_eq!(
            state.begin_update(id, title_patch("x")).unwrap_err(),
            SyncError::NotFound { id }
        );
    }

    #[test]
    fn test_provisional_record_cannot_be_updated() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let id = ticket.provisional.id;
        assert_eq!(
            state.begin_update(id, title_patch("renamed")).unwrap_err(),
            SyncError::Unconfirmed { id }
        );
        assert_eq!(titles(&state), vec!["new", "a"]);
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn test_provisional_record_cannot_be_removed() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let id = ticket.provisional.id;
        assert_eq!(state.begin_remove(id).unwrap_err(), SyncError::Unconfirmed { id });
        assert_eq!(titles(&state), vec!["new", "a"]);
    }

    #[test]
    fn test_canonical_id_accepts_update_after_confirmation() {
        let mut state = ready(1, 5, vec![course(1, "a")]);
        let ticket = state.begin_insert(draft("new")).unwrap();
        let mut canonical = ticket.provisional.clone();
        canonical.id = new_entity_id();
        state.complete_insert(ticket.token, Ok(canonical.clone())).unwrap();

        let update = state.begin_update(canonical.id, title_patch("renamed")).unwrap();
        state.complete_update(update.token, Ok(())).unwrap();
        assert_eq!(titles(&state), vec!["renamed", "a"]);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_completing_unknown_update_token() {
        let al = course(1, "Al");
        let mut state = ready(1, 5, vec![al.clone()]);
        let ticket = state.begin_update(al.id, title_patch("Bo")).unwrap();
        state.complete_update(ticket.token, Ok(())).unwrap();

        assert_eq!(
            state.complete_update(ticket.token, Ok(())).unwrap_err(),
            SyncError::UnknownMutation {
                token: ticket.token.value()
            }
        );
        assert_eq!(
            state.complete_update(ticket.token, Err(rejected())).unwrap_err(),
            SyncError::Remote(rejected())
        );
        assert_eq!(titles(&state), vec!["Bo"]);
    }

    #[test]
    fn test_earlier_failure_keeps_later_pending_patch() {
        let al = course(1, "Al");
        let mut state = ready(1, 5, vec![al.clone()]);
        let first = state.begin_update(al.id, title_patch("Bo")).unwrap();
        let second = state
            .begin_update(
                al.id,
                CoursePatch {
                    title: None,
                    content: Some("new body".to_string()),
                },
            )
            .unwrap();

        state.complete_update(first.token, Err(rejected())).unwrap_err();
        let current = state.get(al.id).unwrap();
        assert_eq!(current.title, "Al");
        assert_eq!(current.content, "new body");

        state.complete_update(second.token, Err(rejected())).unwrap_err();
        assert_eq!(state.get(al.id).unwrap(), &al);
    }

    #[test]
    fn test_acknowledged_later_patch_survives_earlier_failure() {
        let al = course(1, "Al");
        let mut state = ready(1, 5, vec![al.clone()]);
        let first = state.begin_update(al.id, title_patch("Bo")).unwrap();
        let second = state
            .begin_update(
                al.id,
                CoursePatch {
                    title: None,
                    content: Some("kept".to_string()),
                },
            )
            .unwrap();
        state.complete_update(second.token, Ok(())).unwrap();
        assert_eq!(state.pending_count(), 2);

        state.complete_update(first.token, Err(rejected())).unwrap_err();
        let current = state.get(al.id).unwrap();
        assert_eq!(current.title, "Al");
        assert_eq!(current.content, "kept");
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_confirmed_event_wins_over_failed_optimistic_update() {
        let al = course(1, "Al");
        let mut state = ready(1, 5, vec![al.clone()]);
        let ticket = state.begin_update(al.id, title_patch("Bo")).unwrap();

        let mut remote = al.clone();
        remote.title = "Cy".to_string();
        assert_eq!(
            state.apply_external_change(ChangeEvent::Updated(remote.clone())),
            ChangeApplied::Replaced
        );
        state.complete_update(ticket.token, Err(rejected())).unwrap_err();
        assert_eq!(state.get(al.id).unwrap(), &remote);
    }

    // ------------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------------

    #[test]
    fn test_failed_remove_restores_position() {
        let records = vec![course(3, "c"), course(2, "b"), course(1, "a")];
        let mut state = ready(1, 5, records.clone());
        let ticket = state.begin_remove(records[1].id).unwrap();
        assert_eq!(titles(&state), vec!["c", "a"]);
        state.complete_remove(ticket.token, Err(rejected())).unwrap_err();
        assert_eq!(state.records(), records.as_slice());
    }

    #[test]
    fn test_successful_remove_stays_removed() {
        let records = vec![course(2, "b"), course(1, "a")];
        let mut state = ready(1, 5, records.clone());
        let ticket = state.begin_remove(records[0].id).unwrap();
        state.complete_remove(ticket.token, Ok(())).unwrap();
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn test_remove_confirmed_by_event_not_restored() {
        let records = vec![course(2, "b"), course(1, "a")];
        let mut state = ready(1, 5, records.clone());
        let ticket = state.begin_remove(records[0].id).unwrap();
        state.apply_external_change(ChangeEvent::Deleted(records[0].id));
        state.complete_remove(ticket.token, Err(rejected())).unwrap_err();
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn test_restored_record_uses_latest_confirmed_value() {
        let b = course(2, "b");
        let mut state = ready(1, 5, vec![b.clone()]);
        let ticket = state.begin_remove(b.id).unwrap();
        let mut remote = b.clone();
        remote.title = "b2".to_string();
        state.apply_external_change(ChangeEvent::Updated(remote));
        state.complete_remove(ticket.token, Err(rejected())).unwrap_err();
        assert_eq!(titles(&state), vec!["b2"]);
    }

    // ------------------------------------------------------------------------
    // External changes
    // ------------------------------------------------------------------------

    #[test]
    fn test_insert_event_off_first_page_discarded() {
        let mut state = ready(2, 5, vec![course(2, "b")]);
        let before = state.records().to_vec();
        assert_eq!(
            state.apply_external_change(ChangeEvent::Inserted(course(3, "c"))),
            ChangeApplied::Discarded
        );
        assert_eq!(state.records(), before.as_slice());
    }

    #[test]
    fn test_insert_event_on_full_first_page_evicts_tail() {
        let mut state = ready(1, 2, vec![course(2, "b"), course(1, "a")]);
        state.apply_external_change(ChangeEvent::Inserted(course(3, "c")));
        assert_eq!(titles(&state), vec!["c", "b"]);
    }

    #[test]
    fn test_events_before_first_load_discarded() {
        let mut state: CacheState<Course> = CacheState::new(5, None);
        assert_eq!(
            state.apply_external_change(ChangeEvent::Inserted(course(1, "a"))),
            ChangeApplied::Discarded
        );
        assert!(state.is_empty());
    }

    #[test]
    fn test_insert_event_outside_filter_discarded() {
        let owner = new_entity_id();
        let mut state: CacheState<Course> =
            CacheState::new(5, Some(Filter::eq_id("user_id", owner)));
        let ticket = state.begin_load(1, 5).unwrap();
        state.complete_load(ticket, Ok(vec![])).unwrap();

        let mut other = course(1, "other");
        other.user_id = Some(new_entity_id());
        assert_eq!(
            state.apply_external_change(ChangeEvent::Inserted(other)),
            ChangeApplied::Discarded
        );

        let mut mine = course(2, "mine");
        mine.user_id = Some(owner);
        assert_eq!(
            state.apply_external_change(ChangeEvent::Inserted(mine)),
            ChangeApplied::Prepended
        );
    }

    #[test]
    fn test_update_event_keeps_joined_author() {
        let post = Post {
            id: new_entity_id(),
            post_content: "hello".to_string(),
            user_id: new_entity_id(),
            created_at: Utc::now(),
            author: Some(AuthorSummary {
                name: Some("Al".to_string()),
                email: None,
            }),
        };
        let mut state: CacheState<Post> = CacheState::new(5, None);
        let ticket = state.begin_load(1, 5).unwrap();
        state.complete_load(ticket, Ok(vec![post.clone()])).unwrap();

        let bare = Post {
            post_content: "edited".to_string(),
            author: None,
            ..post
        };
        assert_eq!(
            state.apply_external_change(ChangeEvent::Updated(bare)),
            ChangeApplied::Replaced
        );
        let cached = &state.records()[0];
        assert_eq!(cached.post_content, "edited");
        assert_eq!(
            cached.author.as_ref().and_then(|a| a.name.as_deref()),
            Some("Al")
        );
    }

    #[test]
    fn test_mutations_keep_flowing_while_reconciling() {
        let records = vec![course(2, "b"), course(1, "a")];
        let mut state = ready(1, 5, records.clone());
        let insert = state.begin_insert(draft("new")).unwrap();
        let update = state.begin_update(records[1].id, title_patch("a2")).unwrap();
        let remove = state.begin_remove(records[0].id).unwrap();
        assert_eq!(state.pending_count(), 3);

        state.complete_insert(insert.token, Err(rejected())).unwrap_err();
        state.complete_update(update.token, Ok(())).unwrap();
        state.complete_remove(remove.token, Ok(())).unwrap();
        assert_eq!(titles(&state), vec!["a2"]);
        assert_eq!(state.pending_count(), 0);
    }

    proptest! {
        #[test]
        fn delete_of_absent_id_is_noop(n in 0usize..8) {
            let records: Vec<Course> = (0..n as i64).map(|i| course(i, "r")).collect();
            let mut state = ready(1, 10, records.clone());
            let applied = state.apply_external_change(ChangeEvent::Deleted(new_entity_id()));
            prop_assert_eq!(applied, ChangeApplied::Discarded);
            prop_assert_eq!(state.records(), records.as_slice());
        }

        #[test]
        fn update_of_absent_id_is_noop(n in 0usize..8, title in "[a-z]{1,8}") {
            let records: Vec<Course> = (0..n as i64).map(|i| course(i, "r")).collect();
            let mut state = ready(1, 10, records.clone());
            let applied = state.apply_external_change(ChangeEvent::Updated(course(99, &title)));
            prop_assert_eq!(applied, ChangeApplied::Discarded);
            prop_assert_eq!(state.records(), records.as_slice());
        }

        #[test]
        fn failed_update_rolls_back_exactly(n in 1usize..8, pick in 0usize..8, title in "[a-z]{1,8}") {
            let records: Vec<Course> = (0..n as i64).map(|i| course(i, "r")).collect();
            let target = records[pick % n].id;
            let mut state = ready(1, 10, records.clone());
            let ticket = state.begin_update(target, title_patch(&title)).unwrap();
            prop_assert!(state.complete_update(ticket.token, Err(rejected())).is_err());
            prop_assert_eq!(state.records(), records.as_slice());
        }

        #[test]
        fn ids_stay_unique_under_event_storm(events in prop::collection::vec(0u8..3, 1..30)) {
            let pool: Vec<Course> = (0..4).map(|i| course(i, "p")).collect();
            let mut state = ready(1, 3, vec![]);
            for (i, kind) in events.iter().enumerate() {
                let record = pool[i % pool.len()].clone();
                let event = match kind {
                    0 => ChangeEvent::Inserted(record),
                    1 => ChangeEvent::Updated(record),
                    _ => ChangeEvent::Deleted(record.id),
                };
                state.apply_external_change(event);
                let ids: HashSet<_> = state.records().iter().map(|r| r.id).collect();
                prop_assert_eq!(ids.len(), state.len());
                prop_assert!(state.len() <= 3);
            }
        }
    }
}
