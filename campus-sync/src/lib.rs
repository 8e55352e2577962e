//! campus Sync - paged collections kept consistent with a remote table
//!
//! Each list view owns a [`PagedSyncedCollection`]. It loads one offset
//! window of a remote table, applies local mutations optimistically, and
//! reconciles the window against confirmations and pushed change events.
//!
//! The reconciliation rules live in [`CacheState`], a synchronous state
//! machine with no I/O. [`PagedSyncedCollection`] drives it against an
//! injected [`RemoteDataPort`].

pub mod cache;
pub mod collection;
pub mod port;
pub mod subscription;

pub use cache::{
    CacheState, ChangeApplied, CollectionStatus, CorrelationToken, Direction, InsertTicket,
    LoadTicket, PageSnapshot, RemoveTicket, UpdateTicket,
};
pub use collection::PagedSyncedCollection;
pub use port::RemoteDataPort;
pub use subscription::{Subscription, SubscriptionId};
