//! The `slots` table: one row per stored credential.

mod dump;
mod record_set;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

pub use record_set::{Matches, RecordSet};

/// Name of the single table held by a store.
pub const TABLE_NAME: &str = "slots";

/// Columns of the `slots` table, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Domain,
    Username,
    Password,
    Comment,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Id,
        Column::Domain,
        Column::Username,
        Column::Password,
        Column::Comment,
    ];

    /// Columns a caller may write or filter on. `id` is always engine-assigned.
    pub const FIELDS: [Column; 4] = [
        Column::Domain,
        Column::Username,
        Column::Password,
        Column::Comment,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Domain => "domain",
            Column::Username => "username",
            Column::Password => "password",
            Column::Comment => "comment",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = RecordError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = || RecordError::InvalidField {
            name: name.to_string(),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        Column::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(name))
            .ok_or_else(invalid)
    }
}

/// Resolve a caller-supplied field name, rejecting `id`.
fn writable(name: &str) -> Result<Column, RecordError> {
    match name.parse::<Column>()? {
        Column::Id => Err(RecordError::InvalidField {
            name: name.to_string(),
        }),
        column => Ok(column),
    }
}

/// A stored credential. Absent columns are `None` (SQL `NULL` in the dump).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub comment: Option<String>,
}

impl Record {
    /// Text value of a column; `Column::Id` has no text value.
    pub fn text(&self, column: Column) -> Option<&str> {
        match column {
            Column::Id => None,
            Column::Domain => self.domain.as_deref(),
            Column::Username => self.username.as_deref(),
            Column::Password => self.password.as_deref(),
            Column::Comment => self.comment.as_deref(),
        }
    }
}

/// Column values for an insert. The id is assigned by the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecord {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub comment: Option<String>,
}

impl NewRecord {
    pub fn new(
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: Some(domain.into()),
            username: Some(username.into()),
            password: Some(password.into()),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set a column by name-resolved `Column`. Fails for `Column::Id`.
    pub fn set(&mut self, column: Column, value: impl Into<String>) -> Result<(), RecordError> {
        let slot = match column {
            Column::Id => {
                return Err(RecordError::InvalidField {
                    name: column.name().to_string(),
                })
            }
            Column::Domain => &mut self.domain,
            Column::Username => &mut self.username,
            Column::Password => &mut self.password,
            Column::Comment => &mut self.comment,
        };
        *slot = Some(value.into());
        Ok(())
    }

    /// Build from `(name, value)` pairs, as a command surface would receive them.
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut record = Self::default();
        for (name, value) in fields {
            record.set(writable(name.as_ref())?, value)?;
        }
        Ok(record)
    }

    pub(crate) fn into_record(self, id: i64) -> Record {
        Record {
            id,
            domain: self.domain,
            username: self.username,
            password: self.password,
            comment: self.comment,
        }
    }
}

/// Exact-match conjunction over the non-id columns.
///
/// A `None` or empty value means "any value" for that column, never "equals empty".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub comment: Option<String>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn domain(mut self, value: impl Into<String>) -> Self {
        self.domain = Some(value.into());
        self
    }

    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = Some(value.into());
        self
    }

    pub fn password(mut self, value: impl Into<String>) -> Self {
        self.password = Some(value.into());
        self
    }

    pub fn comment(mut self, value: impl Into<String>) -> Self {
        self.comment = Some(value.into());
        self
    }

    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut filter = Self::default();
        for (name, value) in fields {
            filter.set(writable(name.as_ref())?, value)?;
        }
        Ok(filter)
    }

    pub fn set(&mut self, column: Column, value: impl Into<String>) -> Result<(), RecordError> {
        let slot = match column {
            Column::Id => {
                return Err(RecordError::InvalidField {
                    name: column.name().to_string(),
                })
            }
            Column::Domain => &mut self.domain,
            Column::Username => &mut self.username,
            Column::Password => &mut self.password,
            Column::Comment => &mut self.comment,
        };
        *slot = Some(value.into());
        Ok(())
    }

    fn wanted(&self, column: Column) -> Option<&str> {
        let value = match column {
            Column::Id => None,
            Column::Domain => self.domain.as_deref(),
            Column::Username => self.username.as_deref(),
            Column::Password => self.password.as_deref(),
            Column::Comment => self.comment.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn matches(&self, record: &Record) -> bool {
        Column::FIELDS.into_iter().all(|column| match self.wanted(column) {
            Some(wanted) => record.text(column) == Some(wanted),
            None => true,
        })
    }
}
