//! Remote table names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tables exposed by the hosted data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Courses,
    Posts,
    Comments,
    Contacts,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Users,
        Table::Courses,
        Table::Posts,
        Table::Comments,
        Table::Contacts,
    ];

    /// Name of the table on the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Courses => "courses",
            Table::Posts => "posts",
            Table::Comments => "comments",
            Table::Contacts => "contacts",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(Table::Users),
            "courses" => Ok(Table::Courses),
            "posts" => Ok(Table::Posts),
            "comments" => Ok(Table::Comments),
            "contacts" => Ok(Table::Contacts),
            other => Err(format!("unknown table: {}", other)),
        }
    }
}
