//! campus Test Utilities
//!
//! Centralized test infrastructure for the campus workspace:
//! - `InMemoryPort`, a fake hosted backend implementing `RemoteDataPort`
//! - Proptest generators for all entity types
//! - Test fixtures for common scenarios
//! - Assertions for cache contents

pub use campus_core::{
    AuthUser, ChangeEvent, ChangeKind, Comment, Contact, Course, EntityId, Filter, NewComment,
    NewContact, NewCourse, NewPost, NewUser, PageRequest, Post, RawChange, Record, RemoteError,
    Table, Timestamp, User,
};
pub use campus_sync::{RemoteDataPort, Subscription, SubscriptionId};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

// ============================================================================
// IN-MEMORY PORT
// ============================================================================

/// Port operations, used for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    Insert,
    Update,
    Delete,
    Subscribe,
}

#[derive(Debug, Clone)]
struct Row {
    id: EntityId,
    created_at: Timestamp,
    value: Value,
}

type Deliver = Box<dyn Fn(&RawChange) + Send + Sync>;

struct Subscriber {
    table: Table,
    filter: Option<Filter>,
    deliver: Deliver,
}

type Subscribers = Arc<Mutex<HashMap<u64, Subscriber>>>;

/// In-memory stand-in for the hosted data service.
///
/// Ids and `created_at` are assigned on insert, so a canonical record never
/// shares its id with the optimistic one. Every successful mutation is echoed
/// to matching subscribers unless echo is switched off.
pub struct InMemoryPort {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    subscribers: Subscribers,
    next_subscription: AtomicU64,
    failures: Mutex<HashMap<Operation, VecDeque<String>>>,
    calls: Mutex<HashMap<Operation, usize>>,
    echo: AtomicBool,
    clock: Mutex<Timestamp>,
    user: Mutex<Option<AuthUser>>,
}

impl Default for InMemoryPort {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscription: AtomicU64::new(1),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            echo: AtomicBool::new(true),
            clock: Mutex::new(Utc::now()),
            user: Mutex::new(None),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port that never echoes mutations to subscribers.
    pub fn without_echo() -> Self {
        let port = Self::default();
        port.set_echo(false);
        port
    }

    pub fn set_echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::SeqCst);
    }

    /// Make the next call of `op` fail with a rejected error carrying `message`.
    pub fn fail_next(&self, op: Operation, message: impl Into<String>) {
        lock(&self.failures)
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// How many times `op` has been called, failed calls included.
    pub fn calls(&self, op: Operation) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Live subscriptions on `table`.
    pub fn subscriber_count(&self, table: Table) -> usize {
        lock(&self.subscribers)
            .values()
            .filter(|s| s.table == table)
            .count()
    }

    pub fn sign_in_as(&self, user: AuthUser) {
        *lock(&self.user) = Some(user);
    }

    pub fn sign_out(&self) {
        *lock(&self.user) = None;
    }

    /// Store records as-is, without notifying subscribers.
    pub fn seed<T: Record>(&self, records: impl IntoIterator<Item = T>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tables.entry(T::TABLE).or_default();
        for record in records {
            if let Ok(value) = serde_json::to_value(&record) {
                rows.push(Row {
                    id: record.id(),
                    created_at: record.created_at(),
                    value,
                });
            }
        }
    }

    /// Every stored record of a table, newest first.
    pub fn stored<T: Record>(&self) -> Vec<T> {
        self.sorted_rows(T::TABLE)
            .into_iter()
            .filter_map(|row| serde_json::from_value(row.value).ok())
            .collect()
    }

    pub fn row_count(&self, table: Table) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver a raw change to the subscribers of its table.
    pub fn publish(&self, change: RawChange) {
        let subscribers = lock(&self.subscribers);
        for subscriber in subscribers.values() {
            if subscriber.table != change.table {
                continue;
            }
            if let (Some(filter), Some(record)) = (&subscriber.filter, &change.record) {
                if record.get(&filter.column) != Some(&filter.value) {
                    continue;
                }
            }
            (subscriber.deliver)(&change);
        }
    }

    // ------------------------------------------------------------------------
    // Writes made by "another client": always published.
    // ------------------------------------------------------------------------

    pub fn remote_insert<T: Record>(&self, record: &T) -> Result<(), RemoteError> {
        let value = serde_json::to_value(record)?;
        let row = Row {
            id: record.id(),
            created_at: record.created_at(),
            value: value.clone(),
        };
        self.with_rows(T::TABLE, |rows| rows.push(row));
        self.publish(change(T::TABLE, ChangeKind::Insert, Some(value), None));
        Ok(())
    }

    pub fn remote_update<T: Record>(&self, record: &T) -> Result<(), RemoteError> {
        let value = serde_json::to_value(record)?;
        self.with_rows(T::TABLE, |rows| {
            let row = rows
                .iter_mut()
                .find(|row| row.id == record.id())
                .ok_or(RemoteError::NotFound {
                    table: T::TABLE,
                    id: record.id(),
                })?;
            row.value = value.clone();
            Ok::<_, RemoteError>(())
        })?;
        self.publish(change(T::TABLE, ChangeKind::Update, Some(value), None));
        Ok(())
    }

    pub fn remote_delete<T: Record>(&self, id: EntityId) {
        self.with_rows(T::TABLE, |rows| rows.retain(|row| row.id != id));
        self.publish(deleted(T::TABLE, id));
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn record_call(&self, op: Operation) -> Result<(), RemoteError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(message) => Err(RemoteError::rejected(500, message)),
            None => Ok(()),
        }
    }

    fn echoing(&self) -> bool {
        self.echo.load(Ordering::SeqCst)
    }

    /// Strictly increasing server timestamps.
    fn next_timestamp(&self) -> Timestamp {
        let mut clock = lock(&self.clock);
        let now = Utc::now();
        *clock = if now > *clock {
            now
        } else {
            *clock + Duration::microseconds(1)
        };
        *clock
    }

    fn with_rows<R>(&self, table: Table, f: impl FnOnce(&mut Vec<Row>) -> R) -> R {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        f(tables.entry(table).or_default())
    }

    fn sorted_rows(&self, table: Table) -> Vec<Row> {
        let mut rows = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .cloned()
            .unwrap_or_default();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }
}

fn change(table: Table, kind: ChangeKind, record: Option<Value>, old: Option<Value>) -> RawChange {
    RawChange {
        table,
        kind,
        record,
        old_record: old,
    }
}

fn deleted(table: Table, id: EntityId) -> RawChange {
    let mut old = Map::new();
    old.insert("id".to_string(), Value::String(id.to_string()));
    change(table, ChangeKind::Delete, None, Some(Value::Object(old)))
}

#[async_trait]
impl RemoteDataPort for InMemoryPort {
    async fn fetch_page<T: Record>(&self, request: &PageRequest) -> Result<Vec<T>, RemoteError> {
        self.record_call(Operation::Fetch)?;
        self.sorted_rows(T::TABLE)
            .into_iter()
            .filter(|row| match &request.filter {
                Some(filter) => row.value.get(&filter.column) == Some(&filter.value),
                None => true,
            })
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .map(|row| serde_json::from_value(row.value).map_err(RemoteError::from))
            .collect()
    }

    async fn fetch_record<T: Record>(&self, id: EntityId) -> Result<Option<T>, RemoteError> {
        self.record_call(Operation::Fetch)?;
        self.sorted_rows(T::TABLE)
            .into_iter()
            .find(|row| row.id == id)
            .map(|row| serde_json::from_value(row.value).map_err(RemoteError::from))
            .transpose()
    }

    async fn insert_record<T: Record>(&self, draft: &T::Draft) -> Result<T, RemoteError> {
        self.record_call(Operation::Insert)?;
        let Value::Object(mut fields) = serde_json::to_value(draft)? else {
            return Err(RemoteError::rejected(400, "insert payload must be an object"));
        };
        let id = campus_core::new_entity_id();
        let created_at = self.next_timestamp();
        fields.insert("id".to_string(), serde_json::to_value(id)?);
        fields.insert("created_at".to_string(), serde_json::to_value(created_at)?);
        let value = Value::Object(fields);
        let record: T = serde_json::from_value(value.clone())?;

        let row = Row {
            id,
            created_at,
            value: value.clone(),
        };
        self.with_rows(T::TABLE, |rows| rows.push(row));
        if self.echoing() {
            self.publish(change(T::TABLE, ChangeKind::Insert, Some(value), None));
        }
        Ok(record)
    }

    async fn update_record<T: Record>(
        &self,
        id: EntityId,
        patch: &T::Patch,
    ) -> Result<(), RemoteError> {
        self.record_call(Operation::Update)?;
        let Value::Object(fields) = serde_json::to_value(patch)? else {
            return Err(RemoteError::rejected(400, "patch payload must be an object"));
        };
        // A filtered PATCH that matches no row still succeeds, with nothing echoed.
        let updated = self.with_rows(T::TABLE, |rows| {
            let row = rows.iter_mut().find(|row| row.id == id)?;
            if let Value::Object(stored) = &mut row.value {
                stored.extend(fields);
            }
            Some(row.value.clone())
        });
        if let Some(updated) = updated.filter(|_| self.echoing()) {
            self.publish(change(T::TABLE, ChangeKind::Update, Some(updated), None));
        }
        Ok(())
    }

    async fn delete_record<T: Record>(&self, id: EntityId) -> Result<(), RemoteError> {
        self.record_call(Operation::Delete)?;
        let existed = self.with_rows(T::TABLE, |rows| {
            let before = rows.len();
            rows.retain(|row| row.id != id);
            rows.len() != before
        });
        if existed && self.echoing() {
            self.publish(deleted(T::TABLE, id));
        }
        Ok(())
    }

    async fn subscribe<T: Record>(
        &self,
        filter: Option<Filter>,
    ) -> Result<Subscription<T>, RemoteError> {
        self.record_call(Operation::Subscribe)?;
        let key = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let registry = Arc::clone(&self.subscribers);
        let (sender, subscription) = Subscription::channel(SubscriptionId(key), move || {
            lock(&registry).remove(&key);
        });
        let deliver: Deliver = Box::new(move |raw: &RawChange| {
            if let Ok(event) = raw.decode::<T>() {
                let _ = sender.send(event);
            }
        });
        lock(&self.subscribers).insert(
            key,
            Subscriber {
                table: T::TABLE,
                filter,
                deliver,
            },
        );
        Ok(subscription)
    }

    async fn current_user(&self) -> Option<AuthUser> {
        lock(&self.user).clone()
    }
}

impl std::fmt::Debug for InMemoryPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPort")
            .field("subscribers", &lock(&self.subscribers).len())
            .field("echo", &self.echoing())
            .finish()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating campus entity types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid UUIDv7.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        Just(()).prop_map(|_| campus_core::new_entity_id())
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Non-blank text.
    pub fn arb_text() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{0,31}"
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z]{1,12}", "[a-z]{2,8}").prop_map(|(user, host)| format!("{}@{}.edu", user, host))
    }

    pub fn arb_user() -> impl Strategy<Value = User> {
        (arb_entity_id(), proptest::option::of(arb_text()), arb_email(), arb_timestamp()).prop_map(
            |(id, name, email, created_at)| User {
                id,
                name,
                email,
                created_at,
            },
        )
    }

    pub fn arb_course() -> impl Strategy<Value = Course> {
        (
            arb_entity_id(),
            arb_text(),
            arb_text(),
            proptest::option::of(arb_entity_id()),
            arb_timestamp(),
        )
            .prop_map(|(id, title, content, user_id, created_at)| Course {
                id,
                title,
                content,
                user_id,
                created_at,
                registered_users: None,
            })
    }

    pub fn arb_post() -> impl Strategy<Value = Post> {
        (arb_entity_id(), arb_text(), arb_entity_id(), arb_timestamp()).prop_map(
            |(id, post_content, user_id, created_at)| Post {
                id,
                post_content,
                user_id,
                created_at,
                author: None,
            },
        )
    }

    pub fn arb_comment() -> impl Strategy<Value = Comment> {
        (
            arb_entity_id(),
            arb_text(),
            arb_entity_id(),
            arb_entity_id(),
            arb_timestamp(),
        )
            .prop_map(|(id, comment_text, post_id, user_id, created_at)| Comment {
                id,
                comment_text,
                post_id,
                user_id,
                created_at,
                author: None,
            })
    }

    pub fn arb_new_user() -> impl Strategy<Value = NewUser> {
        (arb_text(), arb_email()).prop_map(|(name, email)| NewUser { name, email })
    }

    pub fn arb_new_course() -> impl Strategy<Value = NewCourse> {
        (arb_text(), arb_text()).prop_map(|(title, content)| NewCourse {
            title,
            content,
            user_id: None,
        })
    }

    pub fn arb_new_post() -> impl Strategy<Value = NewPost> {
        (arb_text(), arb_entity_id()).prop_map(|(post_content, user_id)| NewPost {
            post_content,
            user_id,
        })
    }

    pub fn arb_new_comment() -> impl Strategy<Value = NewComment> {
        (arb_text(), arb_entity_id(), arb_entity_id()).prop_map(
            |(comment_text, post_id, user_id)| NewComment {
                comment_text,
                post_id,
                user_id,
            },
        )
    }

    /// Courses with distinct, strictly decreasing `created_at`.
    pub fn arb_course_page(max: usize) -> impl Strategy<Value = Vec<Course>> {
        proptest::collection::vec(arb_course(), 0..=max).prop_map(|mut courses| {
            let base = Utc::now();
            for (i, course) in courses.iter_mut().enumerate() {
                course.created_at = base - Duration::seconds(i as i64);
            }
            courses
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common testing scenarios.

    use super::*;

    fn at(offset_secs: i64) -> Timestamp {
        Utc::now() - Duration::hours(1) + Duration::seconds(offset_secs)
    }

    pub fn user(name: &str) -> User {
        User {
            id: campus_core::new_entity_id(),
            name: Some(name.to_string()),
            email: format!("{}@campus.edu", name.to_lowercase()),
            created_at: at(0),
        }
    }

    pub fn course(title: &str) -> Course {
        Course {
            id: campus_core::new_entity_id(),
            title: title.to_string(),
            content: format!("About {}", title),
            user_id: None,
            created_at: at(0),
            registered_users: None,
        }
    }

    /// `n` courses, newest first, titled `course-{n-1}` down to `course-0`.
    pub fn courses(n: usize) -> Vec<Course> {
        (0..n)
            .rev()
            .map(|i| Course {
                created_at: at(i as i64),
                ..course(&format!("course-{}", i))
            })
            .collect()
    }

    pub fn post(author: &User, content: &str) -> Post {
        Post {
            id: campus_core::new_entity_id(),
            post_content: content.to_string(),
            user_id: author.id,
            created_at: at(0),
            author: None,
        }
    }

    pub fn comment(post: &Post, author: &User, text: &str) -> Comment {
        Comment {
            id: campus_core::new_entity_id(),
            comment_text: text.to_string(),
            post_id: post.id,
            user_id: author.id,
            created_at: at(0),
            author: None,
        }
    }

    pub fn contact(owner: &User, tiktok: &str) -> Contact {
        Contact {
            id: campus_core::new_entity_id(),
            user_id: owner.id,
            tiktok: Some(tiktok.to_string()),
            snapchat: None,
            created_at: at(0),
        }
    }

    pub fn new_course(title: &str) -> NewCourse {
        NewCourse {
            title: title.to_string(),
            content: format!("About {}", title),
            user_id: None,
        }
    }

    pub fn new_user(name: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{}@campus.edu", name.to_lowercase()),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cached record lists.

    use super::*;
    use std::collections::HashSet;

    /// Assert that no id appears twice.
    pub fn assert_unique_ids<T: Record>(records: &[T]) {
        let ids: HashSet<EntityId> = records.iter().map(Record::id).collect();
        assert_eq!(ids.len(), records.len(), "duplicate ids in {:?}", records);
    }

    /// Assert that records are ordered newest first.
    pub fn assert_newest_first<T: Record>(records: &[T]) {
        for pair in records.windows(2) {
            assert!(
                pair[0].created_at() >= pair[1].created_at(),
                "records out of order: {:?}",
                records
            );
        }
    }

    /// Assert the cached ids, in order.
    pub fn assert_ids<T: Record>(records: &[T], expected: &[EntityId]) {
        let ids: Vec<EntityId> = records.iter().map(Record::id).collect();
        assert_eq!(ids, expected);
    }
}
