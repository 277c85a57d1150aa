use thiserror::Error;

/// Errors produced while building, querying or restoring a slot table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The dump text could not be parsed back into a slot table.
    #[error("corrupt store data: {reason}")]
    CorruptData { reason: String },
    /// A column name that is not part of the `slots` schema.
    #[error("invalid field: {name}")]
    InvalidField { name: String },
    /// Every row id up to the SQLite integer maximum has been handed out.
    #[error("no row ids left in the slots table")]
    IdsExhausted,
}

impl RecordError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptData {
            reason: reason.into(),
        }
    }
}
