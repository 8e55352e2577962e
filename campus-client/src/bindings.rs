//! One collection constructor per list view.

use campus_core::{Comment, Contact, Course, EntityId, Filter, Post, SyncError, User};
use campus_sync::{PagedSyncedCollection, RemoteDataPort};
use std::sync::Arc;

pub const USER_COLUMN: &str = "user_id";
pub const POST_COLUMN: &str = "post_id";

pub async fn users<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
) -> Result<PagedSyncedCollection<User, P>, SyncError> {
    PagedSyncedCollection::open(port, page_size, None).await
}

pub async fn courses<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
) -> Result<PagedSyncedCollection<Course, P>, SyncError> {
    PagedSyncedCollection::open(port, page_size, None).await
}

/// One course with its enrolment list, read straight from the remote.
pub async fn course_detail<P: RemoteDataPort>(
    port: &P,
    id: EntityId,
) -> Result<Option<Course>, SyncError> {
    Ok(port.fetch_record::<Course>(id).await?)
}

/// Courses created by one user.
pub async fn courses_by_user<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
    user_id: EntityId,
) -> Result<PagedSyncedCollection<Course, P>, SyncError> {
    PagedSyncedCollection::open(port, page_size, Some(Filter::eq_id(USER_COLUMN, user_id))).await
}

pub async fn posts<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
) -> Result<PagedSyncedCollection<Post, P>, SyncError> {
    PagedSyncedCollection::open(port, page_size, None).await
}

pub async fn posts_by_user<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
    user_id: EntityId,
) -> Result<PagedSyncedCollection<Post, P>, SyncError> {
    PagedSyncedCollection::open(port, page_size, Some(Filter::eq_id(USER_COLUMN, user_id))).await
}

/// The comment thread under one post.
pub async fn comments_for_post<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
    post_id: EntityId,
) -> Result<PagedSyncedCollection<Comment, P>, SyncError> {
    PagedSyncedCollection::open(port, page_size, Some(Filter::eq_id(POST_COLUMN, post_id))).await
}

/// The signed-in user's contact handles.
pub async fn contacts_for_current_user<P: RemoteDataPort>(
    port: Arc<P>,
    page_size: u32,
) -> Result<PagedSyncedCollection<Contact, P>, SyncError> {
    let user = port.current_user().await.ok_or(SyncError::NotSignedIn)?;
    PagedSyncedCollection::open(port, page_size, Some(Filter::eq_id(USER_COLUMN, user.id))).await
}
