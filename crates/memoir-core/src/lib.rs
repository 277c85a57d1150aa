//! Core abstractions for Memoir: credential records, the in-memory slot table
//! and its text dump format. Nothing in this crate touches the filesystem.

pub mod error;
pub mod password;
pub mod slots;

pub use error::RecordError;
pub use slots::{Column, Filter, Matches, NewRecord, Record, RecordSet};
