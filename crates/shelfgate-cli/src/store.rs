//! SQLite record store.
//!
//! One table, one row per registered person. The face signature is stored
//! as a little-endian `f64` blob; status and held item are kept consistent
//! by a CHECK constraint and re-validated when rows are read back.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use shelfgate_core::{
    CirculationError, CirculationState, Embedding, FaceIndex, IndexEntry, ItemCode, Outcome,
};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS people (
    id             INTEGER PRIMARY KEY,
    name           TEXT    NOT NULL UNIQUE,
    face_signature BLOB    NOT NULL,
    status         TEXT    NOT NULL DEFAULT 'not issued',
    held_item      TEXT    DEFAULT NULL,
    registered_at  TEXT    NOT NULL,
    CHECK (
        (status = 'not issued' AND held_item IS NULL)
        OR (status = 'issued' AND held_item IS NOT NULL AND length(held_item) = 8)
    )
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("name {0:?} is already registered")]
    NameTaken(String),
    #[error("no person with id {0}")]
    UnknownPerson(i64),
    #[error("row {id} is corrupt: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error(transparent)]
    Circulation(#[from] CirculationError),
}

/// A person row as the rest of the program sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub id: i64,
    pub name: String,
    pub state: CirculationState,
    pub registered_at: DateTime<Utc>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened record store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a new person in the `not issued` state.
    pub fn register(
        &self,
        name: &str,
        signature: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<PersonRecord, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO people (name, face_signature, registered_at) VALUES (?1, ?2, ?3)",
            params![name, signature.to_blob(), now.to_rfc3339()],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(StoreError::NameTaken(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        tracing::info!(id, name, "person registered");
        Ok(PersonRecord {
            id,
            name: name.to_string(),
            state: CirculationState::NotIssued,
            registered_at: now,
        })
    }

    /// Build the in-memory face index from every stored signature, in row order.
    pub fn face_index(&self) -> Result<FaceIndex, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, face_signature FROM people ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
        })?;

        let mut index = FaceIndex::new();
        for row in rows {
            let (id, name, blob) = row?;
            let embedding = Embedding::from_blob(&blob).map_err(|e| StoreError::Corrupt {
                id,
                reason: e.to_string(),
            })?;
            index.insert(IndexEntry { person_id: id, name }, embedding);
        }
        tracing::debug!(entries = index.len(), "face index built");
        Ok(index)
    }

    pub fn person(&self, id: i64) -> Result<Option<PersonRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, status, held_item, registered_at FROM people WHERE id = ?1",
                params![id],
                RawPerson::from_row,
            )
            .optional()?
            .map(RawPerson::into_record)
            .transpose()
    }

    pub fn person_by_name(&self, name: &str) -> Result<Option<PersonRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, status, held_item, registered_at FROM people WHERE name = ?1",
                params![name],
                RawPerson::from_row,
            )
            .optional()?
            .map(RawPerson::into_record)
            .transpose()
    }

    /// Every person, in row order.
    pub fn records(&self) -> Result<Vec<PersonRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, status, held_item, registered_at FROM people ORDER BY id",
        )?;
        let raw = stmt
            .query_map([], RawPerson::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawPerson::into_record).collect()
    }

    /// Apply one circulation attempt for `person_id`.
    ///
    /// The status read and the update run in a single IMMEDIATE transaction,
    /// so no other writer can slip in between them.
    pub fn transact(&mut self, person_id: i64, code: &ItemCode) -> Result<Outcome, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (status, held): (String, Option<String>) = tx
            .query_row(
                "SELECT status, held_item FROM people WHERE id = ?1",
                params![person_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::UnknownPerson(person_id))?;

        let current = CirculationState::from_columns(&status, held).map_err(|e| StoreError::Corrupt {
            id: person_id,
            reason: e.to_string(),
        })?;

        // Refusals return before the write; dropping `tx` rolls back.
        let (next, outcome) = current.next(code)?;

        tx.execute(
            "UPDATE people SET status = ?1, held_item = ?2 WHERE id = ?3",
            params![next.status(), next.held_item().map(ItemCode::as_str), person_id],
        )?;
        tx.commit()?;

        tracing::info!(person_id, %outcome, "circulation updated");
        Ok(outcome)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Row columns before validation.
struct RawPerson {
    id: i64,
    name: String,
    status: String,
    held: Option<String>,
    registered_at: String,
}

impl RawPerson {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            status: row.get(2)?,
            held: row.get(3)?,
            registered_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<PersonRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };
        let state = CirculationState::from_columns(&self.status, self.held)
            .map_err(|e| corrupt(e.to_string()))?;
        let registered_at = DateTime::parse_from_rfc3339(&self.registered_at)
            .map_err(|e| corrupt(format!("registered_at: {e}")))?
            .with_timezone(&Utc);
        Ok(PersonRecord { id, name: self.name, state, registered_at })
    }
}
