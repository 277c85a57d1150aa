use std::slice;

use tracing::debug;

use super::{dump, Filter, NewRecord, Record};
use crate::error::RecordError;

/// In-memory `slots` table. Rows keep insertion order; ids are never reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    rows: Vec<Record>,
    /// Last id handed out, persisted so restored tables keep counting from it.
    last_id: i64,
}

impl RecordSet {
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Rebuild a table from the bytes produced by [`RecordSet::serialize`].
    pub fn restore(serialized: &[u8]) -> Result<Self, RecordError> {
        let text = std::str::from_utf8(serialized)
            .map_err(|e| RecordError::corrupt(format!("dump is not valid UTF-8: {e}")))?;
        let set = dump::parse(text)?;
        debug!(rows = set.rows.len(), last_id = set.last_id, "restored slot table");
        Ok(set)
    }

    pub fn serialize(&self) -> Vec<u8> {
        dump::render(self).into_bytes()
    }

    /// Insert a row and return its assigned id.
    pub fn put(&mut self, record: NewRecord) -> Result<i64, RecordError> {
        let id = self
            .last_id
            .checked_add(1)
            .ok_or(RecordError::IdsExhausted)?;
        self.rows.push(record.into_record(id));
        self.last_id = id;
        Ok(id)
    }

    /// Rows matching `filter`, in insertion order.
    pub fn get<'a, 'f>(&'a self, filter: &'f Filter) -> Matches<'a, 'f> {
        Matches {
            rows: self.rows.iter(),
            filter,
        }
    }

    /// Remove the row with `id`. Unknown ids are ignored.
    pub fn delete(&mut self, id: i64) {
        self.rows.retain(|row| row.id != id);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub(crate) fn last_id(&self) -> i64 {
        self.last_id
    }

    pub(crate) fn from_parts(rows: Vec<Record>, last_id: i64) -> Self {
        Self { rows, last_id }
    }
}

/// One-shot iterator over the rows matching a [`Filter`]. Call `get` again to restart.
#[derive(Debug, Clone)]
pub struct Matches<'a, 'f> {
    rows: slice::Iter<'a, Record>,
    filter: &'f Filter,
}

impl<'a> Iterator for Matches<'a, '_> {
    type Item = &'a Record;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.rows.find(|row| filter.matches(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.rows.size_hint().1)
    }
}
