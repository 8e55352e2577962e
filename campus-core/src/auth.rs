//! Account forms and the signed-in user.

use crate::{EntityId, ValidateNonEmpty, ValidationError};
use serde::{Deserialize, Serialize};

/// Shortest password accepted at sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

/// The authenticated account as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: EntityId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUpForm {
    /// Checks run before the auth service is contacted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.email.validate_non_empty("email")?;
        self.password.validate_non_empty("password")?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::invalid(
                "password",
                format!("must be at least {} characters long", MIN_PASSWORD_LEN),
            ));
        }
        if self.password != self.confirm_password {
            return Err(ValidationError::invalid(
                "confirm_password",
                "passwords do not match",
            ));
        }
        Ok(())
    }

    /// Email with surrounding whitespace removed, as sent to the service.
    pub fn normalized_email(&self) -> &str {
        self.email.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl SignInForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.email.validate_non_empty("email")?;
        self.password.validate_non_empty("password")
    }

    pub fn normalized_email(&self) -> &str {
        self.email.trim()
    }
}
