//! Validation Traits
//!
//! Common non-empty checks used by drafts, patches and auth forms.

use crate::ValidationError;

/// Trait for validating non-empty strings.
///
/// # Example
/// ```
/// use campus_core::ValidateNonEmpty;
///
/// assert!("Intro to Rust".validate_non_empty("title").is_ok());
/// assert!("   ".validate_non_empty("title").is_err());
/// ```
pub trait ValidateNonEmpty {
    /// Validate that the value is non-empty.
    ///
    /// # Errors
    /// Returns `ValidationError::RequiredFieldMissing` if the value is empty
    /// or whitespace-only.
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        if self.trim().is_empty() {
            return Err(ValidationError::missing(field_name));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for &str {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        (*self).validate_non_empty(field_name)
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        self.as_str().validate_non_empty(field_name)
    }
}

impl<T: ValidateNonEmpty> ValidateNonEmpty for Option<T> {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        match self {
            Some(value) => value.validate_non_empty(field_name),
            None => Err(ValidationError::missing(field_name)),
        }
    }
}

/// Validate an optional patch field: absent is fine, present must be non-empty.
pub fn validate_patch_field<T: ValidateNonEmpty>(
    value: &Option<T>,
    field_name: &str,
) -> Result<(), ValidationError> {
    match value {
        Some(inner) => inner.validate_non_empty(field_name),
        None => Ok(()),
    }
}
