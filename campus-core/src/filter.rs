//! Page windows and equality filters.

use crate::{EntityId, Record, ValidationError};
use serde::{Deserialize, Serialize};

/// Sort column for every list: creation time.
pub const DEFAULT_ORDER_COLUMN: &str = "created_at";

/// Equality filter on a single column, e.g. comments with `post_id = X`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn equals(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Filter on a foreign-key column.
    pub fn eq_id(column: impl Into<String>, id: EntityId) -> Self {
        Self::equals(column, id.to_string())
    }

    /// Whether a record satisfies the filter.
    pub fn matches<T: Record>(&self, record: &T) -> bool {
        record.column(&self.column).as_ref() == Some(&self.value)
    }

    /// Value rendered without JSON quoting, as used in query strings.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One offset window of a remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    pub filter: Option<Filter>,
    pub order_by: String,
    pub descending: bool,
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    /// Window `[(page-1)*limit, page*limit)` ordered by creation time, newest first.
    pub fn for_page(page: u32, limit: u32) -> Result<Self, ValidationError> {
        if page == 0 {
            return Err(ValidationError::InvalidPage { page });
        }
        if limit == 0 {
            return Err(ValidationError::InvalidLimit { limit });
        }
        Ok(Self {
            filter: None,
            order_by: DEFAULT_ORDER_COLUMN.to_string(),
            descending: true,
            offset: u64::from(page - 1) * u64::from(limit),
            limit,
        })
    }

    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_page_zero_rejected() {
        assert_eq!(
            PageRequest::for_page(0, 10),
            Err(ValidationError::InvalidPage { page: 0 })
        );
    }

    #[test]
    fn test_limit_zero_rejected() {
        assert_eq!(
            PageRequest::for_page(1, 0),
            Err(ValidationError::InvalidLimit { limit: 0 })
        );
    }

    #[test]
    fn test_filter_value_text_unquoted() {
        let filter = Filter::equals("post_id", "abc");
        assert_eq!(filter.value_text(), "abc");
        assert_eq!(Filter::equals("n", 3).value_text(), "3");
    }

    proptest! {
        #[test]
        fn page_window_is_contiguous(page in 1u32..10_000, limit in 1u32..500) {
            let current = PageRequest::for_page(page, limit).unwrap();
            let next = PageRequest::for_page(page + 1, limit).unwrap();
            prop_assert_eq!(current.offset + u64::from(limit), next.offset);
            prop_assert!(current.descending);
            prop_assert_eq!(current.order_by.as_str(), DEFAULT_ORDER_COLUMN);
        }
    }
}
