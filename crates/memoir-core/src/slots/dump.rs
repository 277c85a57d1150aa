//! SQL-text dump of the `slots` table.
//!
//! The format is a sequence of `;`-terminated statements, close to what an
//! SQLite `.dump` of the same table produces:
//!
//! ```text
//! BEGIN TRANSACTION;
//! CREATE TABLE slots(id INTEGER PRIMARY KEY AUTOINCREMENT, domain TEXT, ...);
//! INSERT INTO "slots" VALUES(1,'example.org','bob','secret',NULL);
//! DELETE FROM sqlite_sequence;
//! INSERT INTO sqlite_sequence VALUES('slots',1);
//! COMMIT;
//! ```
//!
//! Restoring runs the dump against a scratch in-memory SQLite database and
//! reads the `slots` table back, so any dump SQLite itself produces is
//! accepted. Text columns holding numbers or UTF-8 blobs come back as text.

use rusqlite::{types::ValueRef, Connection, OptionalExtension};

use super::{Column, Record, RecordSet, TABLE_NAME};
use crate::error::RecordError;

const SEQUENCE_TABLE: &str = "sqlite_sequence";

pub(super) fn render(set: &RecordSet) -> String {
    let mut out = String::from("BEGIN TRANSACTION;\n");
    out.push_str(
        "CREATE TABLE slots(id INTEGER PRIMARY KEY AUTOINCREMENT, \
         domain TEXT, username TEXT, password TEXT, comment TEXT);\n",
    );
    for row in set.rows() {
        out.push_str(&format!("INSERT INTO \"{TABLE_NAME}\" VALUES({}", row.id));
        for column in Column::FIELDS {
            out.push(',');
            push_value(&mut out, row.text(column));
        }
        out.push_str(");\n");
    }
    out.push_str(&format!("DELETE FROM {SEQUENCE_TABLE};\n"));
    out.push_str(&format!(
        "INSERT INTO {SEQUENCE_TABLE} VALUES('{TABLE_NAME}',{});\n",
        set.last_id()
    ));
    out.push_str("COMMIT;\n");
    out
}

fn push_value(out: &mut String, value: Option<&str>) {
    match value {
        None => out.push_str("NULL"),
        Some(text) => {
            out.push('\'');
            out.push_str(&text.replace('\'', "''"));
            out.push('\'');
        }
    }
}

/// SQLite error codes only; messages may quote dump text, and that text may be a secret.
fn sql_error(context: &'static str) -> impl FnOnce(rusqlite::Error) -> RecordError {
    move |err| match err.sqlite_error() {
        Some(failure) => RecordError::corrupt(format!("{context}: {failure}")),
        None => RecordError::corrupt(format!("{context}: {err}")),
    }
}

pub(super) fn parse(text: &str) -> Result<RecordSet, RecordError> {
    let conn = Connection::open_in_memory().map_err(sql_error("cannot open scratch database"))?;
    conn.execute_batch(text)
        .map_err(sql_error("dump does not execute"))?;

    check_columns(&conn)?;
    let rows = read_rows(&conn)?;
    let sequence = read_sequence(&conn)?;

    let max_id = rows.iter().map(|r| r.id).max().unwrap_or(0);
    let last_id = sequence.unwrap_or(0).max(max_id).max(0);
    Ok(RecordSet::from_parts(rows, last_id))
}

fn check_columns(conn: &Connection) -> Result<(), RecordError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(sql_error("cannot inspect slots table"))?;
    let columns = stmt
        .query_map([TABLE_NAME], |row| row.get::<_, String>(0))
        .and_then(|names| names.collect::<Result<Vec<_>, _>>())
        .map_err(sql_error("cannot inspect slots table"))?;

    if columns.is_empty() {
        return Err(RecordError::corrupt("missing slots table definition"));
    }
    let expected = Column::ALL.iter().map(|c| c.name());
    let matches = columns.len() == Column::ALL.len()
        && columns
            .iter()
            .zip(expected)
            .all(|(got, want)| got.eq_ignore_ascii_case(want));
    if matches {
        Ok(())
    } else {
        Err(RecordError::corrupt(format!(
            "unexpected slots columns: {}",
            columns.join(", ")
        )))
    }
}

fn read_rows(conn: &Connection) -> Result<Vec<Record>, RecordError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, domain, username, password, comment FROM {TABLE_NAME} ORDER BY rowid"
        ))
        .map_err(sql_error("cannot read slots table"))?;
    let mut query = stmt.query([]).map_err(sql_error("cannot read slots table"))?;

    let mut rows: Vec<Record> = Vec::new();
    while let Some(row) = query.next().map_err(sql_error("cannot read slots table"))? {
        let id = match row.get_ref(0).map_err(sql_error("cannot read row id"))? {
            ValueRef::Integer(id) => id,
            _ => return Err(RecordError::corrupt("row id is not an integer")),
        };
        if rows.iter().any(|r| r.id == id) {
            return Err(RecordError::corrupt(format!("duplicate row id {id}")));
        }
        let field = |idx: usize| -> Result<Option<String>, RecordError> {
            let value = row.get_ref(idx).map_err(sql_error("cannot read row"))?;
            text_value(value, id)
        };
        let record = Record {
            id,
            domain: field(1)?,
            username: field(2)?,
            password: field(3)?,
            comment: field(4)?,
        };
        rows.push(record);
    }
    Ok(rows)
}

fn text_value(value: ValueRef<'_>, id: i64) -> Result<Option<String>, RecordError> {
    let bytes = match value {
        ValueRef::Null => return Ok(None),
        ValueRef::Integer(n) => return Ok(Some(n.to_string())),
        ValueRef::Real(x) => return Ok(Some(x.to_string())),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes,
    };
    String::from_utf8(bytes.to_vec())
        .map(Some)
        .map_err(|_| RecordError::corrupt(format!("row {id} holds a value that is not UTF-8")))
}

/// Counter from `sqlite_sequence`, present only for `AUTOINCREMENT` tables.
fn read_sequence(conn: &Connection) -> Result<Option<i64>, RecordError> {
    let has_sequence: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [SEQUENCE_TABLE],
            |row| row.get(0),
        )
        .map_err(sql_error("cannot read schema"))?;
    if !has_sequence {
        return Ok(None);
    }
    conn.query_row(
        &format!("SELECT seq FROM {SEQUENCE_TABLE} WHERE name = ?1 COLLATE NOCASE"),
        [TABLE_NAME],
        |row| row.get::<_, Option<i64>>(0),
    )
    .optional()
    .map(Option::flatten)
    .map_err(sql_error("cannot read id counter"))
}
