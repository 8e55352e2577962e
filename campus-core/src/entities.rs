//! Core entity structures
//!
//! One schema per remote table. Drafts carry the caller-supplied fields of
//! a new row, patches the fields of an edit.

use crate::record::require_id;
use crate::validation::validate_patch_field;
use crate::{EntityId, Record, Table, Timestamp, ValidateNonEmpty, ValidationError};
use serde::{Deserialize, Serialize};

/// Author columns embedded by a `users(name, email)` join.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub name: Option<String>,
    pub email: Option<String>,
}

// ============================================================================
// USERS
// ============================================================================

/// User profile row.
/// Rows created during sign-up only carry an email, so `name` is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    email.validate_non_empty("email")?;
    if !email.contains('@') {
        return Err(ValidationError::invalid("email", "must contain '@'"));
    }
    Ok(())
}

impl Record for User {
    type Draft = NewUser;
    type Patch = UserPatch;

    const TABLE: Table = Table::Users;

    fn id(&self) -> EntityId {
        self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(self.id, "id")
    }

    fn validate_draft(draft: &NewUser) -> Result<(), ValidationError> {
        draft.name.validate_non_empty("name")?;
        validate_email(&draft.email)
    }

    fn validate_patch(patch: &UserPatch) -> Result<(), ValidationError> {
        validate_patch_field(&patch.name, "name")?;
        if let Some(email) = &patch.email {
            validate_email(email)?;
        }
        Ok(())
    }

    fn materialize(id: EntityId, created_at: Timestamp, draft: &NewUser) -> Self {
        Self {
            id,
            name: Some(draft.name.clone()),
            email: draft.email.clone(),
            created_at,
        }
    }

    fn apply_patch(&mut self, patch: &UserPatch) {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
    }
}

// ============================================================================
// COURSES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: EntityId,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub user_id: Option<EntityId>,
    pub created_at: Timestamp,
    /// Enrolment column, stored as `[{"userss": [name | {"name": ..}, ..]}]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_users: Option<serde_json::Value>,
}

impl Course {
    /// Names of the users enrolled in the course.
    pub fn registered_user_names(&self) -> Vec<String> {
        self.registered_users
            .as_ref()
            .and_then(|value| value.get(0))
            .and_then(|first| first.get("userss"))
            .and_then(|list| list.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|entry| match entry {
                        serde_json::Value::String(name) => Some(name.clone()),
                        other => other.get("name").and_then(|n| n.as_str()).map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCourse {
    pub title: String,
    pub content: String,
    pub user_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoursePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Record for Course {
    type Draft = NewCourse;
    type Patch = CoursePatch;

    const TABLE: Table = Table::Courses;

    fn id(&self) -> EntityId {
        self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(self.id, "id")
    }

    fn validate_draft(draft: &NewCourse) -> Result<(), ValidationError> {
        draft.title.validate_non_empty("title")?;
        draft.content.validate_non_empty("content")
    }

    fn validate_patch(patch: &CoursePatch) -> Result<(), ValidationError> {
        validate_patch_field(&patch.title, "title")?;
        validate_patch_field(&patch.content, "content")
    }

    fn materialize(id: EntityId, created_at: Timestamp, draft: &NewCourse) -> Self {
        Self {
            id,
            title: draft.title.clone(),
            content: draft.content.clone(),
            user_id: draft.user_id,
            created_at,
            registered_users: None,
        }
    }

    fn apply_patch(&mut self, patch: &CoursePatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
    }
}

// ============================================================================
// POSTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: EntityId,
    pub post_content: String,
    pub user_id: EntityId,
    pub created_at: Timestamp,
    #[serde(default, rename = "users", skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub post_content: String,
    pub user_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_content: Option<String>,
}

impl Record for Post {
    type Draft = NewPost;
    type Patch = PostPatch;

    const TABLE: Table = Table::Posts;
    const SELECT: &'static str = "*,users(name,email)";

    fn id(&self) -> EntityId {
        self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(self.id, "id")?;
        require_id(self.user_id, "user_id")
    }

    fn validate_draft(draft: &NewPost) -> Result<(), ValidationError> {
        draft.post_content.validate_non_empty("post_content")?;
        require_id(draft.user_id, "user_id")
    }

    fn validate_patch(patch: &PostPatch) -> Result<(), ValidationError> {
        validate_patch_field(&patch.post_content, "post_content")
    }

    fn materialize(id: EntityId, created_at: Timestamp, draft: &NewPost) -> Self {
        Self {
            id,
            post_content: draft.post_content.clone(),
            user_id: draft.user_id,
            created_at,
            author: None,
        }
    }

    fn apply_patch(&mut self, patch: &PostPatch) {
        if let Some(content) = &patch.post_content {
            self.post_content = content.clone();
        }
    }

    fn merge_confirmed(&mut self, incoming: Self) {
        let author = self.author.take();
        *self = incoming;
        if self.author.is_none() {
            self.author = author;
        }
    }
}

// ============================================================================
// COMMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: EntityId,
    pub comment_text: String,
    pub post_id: EntityId,
    pub user_id: EntityId,
    pub created_at: Timestamp,
    #[serde(default, rename = "users", skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub comment_text: String,
    pub post_id: EntityId,
    pub user_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_text: Option<String>,
}

impl Record for Comment {
    type Draft = NewComment;
    type Patch = CommentPatch;

    const TABLE: Table = Table::Comments;
    const SELECT: &'static str = "*,users(name,email)";

    fn id(&self) -> EntityId {
        self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(self.id, "id")?;
        require_id(self.post_id, "post_id")
    }

    fn validate_draft(draft: &NewComment) -> Result<(), ValidationError> {
        draft.comment_text.validate_non_empty("comment_text")?;
        require_id(draft.post_id, "post_id")?;
        require_id(draft.user_id, "user_id")
    }

    fn validate_patch(patch: &CommentPatch) -> Result<(), ValidationError> {
        validate_patch_field(&patch.comment_text, "comment_text")
    }

    fn materialize(id: EntityId, created_at: Timestamp, draft: &NewComment) -> Self {
        Self {
            id,
            comment_text: draft.comment_text.clone(),
            post_id: draft.post_id,
            user_id: draft.user_id,
            created_at,
            author: None,
        }
    }

    fn apply_patch(&mut self, patch: &CommentPatch) {
        if let Some(text) = &patch.comment_text {
            self.comment_text = text.clone();
        }
    }

    fn merge_confirmed(&mut self, incoming: Self) {
        let author = self.author.take();
        *self = incoming;
        if self.author.is_none() {
            self.author = author;
        }
    }
}

// ============================================================================
// CONTACTS
// ============================================================================

/// Social handles a user shares on the contacts page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: EntityId,
    pub user_id: EntityId,
    #[serde(default)]
    pub tiktok: Option<String>,
    #[serde(default)]
    pub snapchat: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
    pub user_id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiktok: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapchat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiktok: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapchat: Option<String>,
}

impl Record for Contact {
    type Draft = NewContact;
    type Patch = ContactPatch;

    const TABLE: Table = Table::Contacts;

    fn id(&self) -> EntityId {
        self.id
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_id(self.id, "id")?;
        require_id(self.user_id, "user_id")
    }

    fn validate_draft(draft: &NewContact) -> Result<(), ValidationError> {
        require_id(draft.user_id, "user_id")?;
        if draft.tiktok.is_none() && draft.snapchat.is_none() {
            return Err(ValidationError::invalid("contact", "at least one handle is required"));
        }
        validate_patch_field(&draft.tiktok, "tiktok")?;
        validate_patch_field(&draft.snapchat, "snapchat")
    }

    fn validate_patch(patch: &ContactPatch) -> Result<(), ValidationError> {
        validate_patch_field(&patch.tiktok, "tiktok")?;
        validate_patch_field(&patch.snapchat, "snapchat")
    }

    fn materialize(id: EntityId, created_at: Timestamp, draft: &NewContact) -> Self {
        Self {
            id,
            user_id: draft.user_id,
            tiktok: draft.tiktok.clone(),
            snapchat: draft.snapchat.clone(),
            created_at,
        }
    }

    fn apply_patch(&mut self, patch: &ContactPatch) {
        if let Some(tiktok) = &patch.tiktok {
            self.tiktok = Some(tiktok.clone());
        }
        if let Some(snapchat) = &patch.snapchat {
            self.snapchat = Some(snapchat.clone());
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
