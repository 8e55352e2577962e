//! campus Core - Entity Types
//!
//! Pure data structures shared by every other crate in the workspace:
//! identity, table names, entity schemas, change events, page requests
//! and the error taxonomy. Nothing in here performs I/O.

pub mod auth;
pub mod entities;
pub mod error;
pub mod event;
pub mod filter;
pub mod identity;
pub mod record;
pub mod table;
pub mod validation;

pub use auth::{AuthUser, SignInForm, SignUpForm, MIN_PASSWORD_LEN};
pub use entities::{
    AuthorSummary, Comment, CommentPatch, Contact, ContactPatch, Course, CoursePatch, NewComment,
    NewContact, NewCourse, NewPost, NewUser, Post, PostPatch, User, UserPatch,
};
pub use error::{CampusError, CampusResult, FetchError, RemoteError, SyncError, ValidationError};
pub use event::{ChangeEvent, ChangeKind, RawChange};
pub use filter::{Filter, PageRequest, DEFAULT_ORDER_COLUMN};
pub use identity::{new_entity_id, EntityId, Timestamp};
pub use record::Record;
pub use table::Table;
pub use validation::ValidateNonEmpty;
