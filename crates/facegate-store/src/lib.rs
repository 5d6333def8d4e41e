//! facegate-store — SQLite persistence for events and face registrations.
//!
//! Two tables: `events`, and `faces` holding one row per registration with
//! the registrant fields and the embedding as a little-endian f32 blob.
//! A unique index on `(event_id, email)` backs the one-registration-per-email
//! rule at the storage level, so concurrent writers cannot both slip past
//! the handler's pre-check.
//! All functions take a plain [`rusqlite::Connection`]; async callers wrap
//! them with `tokio-rusqlite` or `spawn_blocking`.

pub mod blob;

use facegate_core::{Embedding, FaceRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt embedding blob: {0}")]
    CorruptEmbedding(String),
    #[error("email already registered for this event")]
    DuplicateRegistration,
}

/// An event under which faces are registered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub date: String,
    pub facility: String,
    pub description: String,
    pub created_by: String,
    pub created_at: String,
}

/// Registration metadata without the embedding, for listing endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceSummary {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub school: String,
    pub email: String,
    pub created_at: String,
}

/// Create tables if they do not exist. Safe to call on every startup.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            date        TEXT NOT NULL,
            facility    TEXT NOT NULL,
            description TEXT NOT NULL,
            created_by  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS faces (
            id            TEXT PRIMARY KEY,
            event_id      TEXT NOT NULL REFERENCES events(id),
            name          TEXT NOT NULL,
            school        TEXT NOT NULL,
            email         TEXT NOT NULL,
            embedding     BLOB NOT NULL,
            model_version TEXT,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_faces_event ON faces(event_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_faces_event_email ON faces(event_id, email);",
    )?;
    tracing::debug!("database schema ready");
    Ok(())
}

pub fn insert_event(conn: &Connection, event: &EventRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO events (id, title, date, facility, description, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id,
            event.title,
            event.date,
            event.facility,
            event.description,
            event.created_by,
            event.created_at
        ],
    )?;
    Ok(())
}

pub fn list_events(conn: &Connection) -> Result<Vec<EventRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, date, facility, description, created_by, created_at
         FROM events ORDER BY created_at",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(EventRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            date: row.get(2)?,
            facility: row.get(3)?,
            description: row.get(4)?,
            created_by: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn event_exists(conn: &Connection, event_id: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM events WHERE id = ?1",
            params![event_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Fetch a single event by id, or `None` if it does not exist.
pub fn get_event(conn: &Connection, event_id: &str) -> Result<Option<EventRecord>, StoreError> {
    let record = conn
        .query_row(
            "SELECT id, title, date, facility, description, created_by, created_at
             FROM events WHERE id = ?1",
            params![event_id],
            |row| {
                Ok(EventRecord {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    date: row.get(2)?,
                    facility: row.get(3)?,
                    description: row.get(4)?,
                    created_by: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Persist one face registration. A registration referencing a missing
/// event is rejected by the foreign key; callers check the event first to
/// report it as a client error. Inserting a second registration for the
/// same `(event_id, email)` pair trips the unique index and is surfaced as
/// [`StoreError::DuplicateRegistration`].
pub fn insert_face(conn: &Connection, face: &FaceRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO faces (id, event_id, name, school, email, embedding, model_version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            face.id,
            face.event_id,
            face.name,
            face.school,
            face.email,
            blob::encode(&face.embedding.values),
            face.embedding.model_version,
            face.created_at
        ],
    )
    .map_err(|err| match err {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::DuplicateRegistration
        }
        other => StoreError::Sqlite(other),
    })?;
    Ok(())
}

/// Load the full gallery (embeddings included) registered under an event.
pub fn gallery_for_event(conn: &Connection, event_id: &str) -> Result<Vec<FaceRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, name, school, email, embedding, model_version, created_at
         FROM faces WHERE event_id = ?1",
    )?;
    let rows = stmt.query_map(params![event_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Vec<u8>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut gallery = Vec::new();
    for row in rows {
        let (id, event_id, name, school, email, raw, model_version, created_at) = row?;
        gallery.push(FaceRecord {
            id,
            event_id,
            name,
            school,
            email,
            embedding: Embedding {
                values: blob::decode(&raw)?,
                model_version,
            },
            created_at,
        });
    }
    Ok(gallery)
}

/// Registration metadata for an event, embeddings omitted.
pub fn faces_for_event(conn: &Connection, event_id: &str) -> Result<Vec<FaceSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, name, school, email, created_at
         FROM faces WHERE event_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![event_id], |row| {
        Ok(FaceSummary {
            id: row.get(0)?,
            event_id: row.get(1)?,
            name: row.get(2)?,
            school: row.get(3)?,
            email: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Remove a registration by id. Returns whether a row was deleted.
pub fn delete_face(conn: &Connection, face_id: &str) -> Result<bool, StoreError> {
    let affected = conn.execute("DELETE FROM faces WHERE id = ?1", params![face_id])?;
    Ok(affected > 0)
}

/// Whether the email is already registered under the event.
pub fn email_registered(conn: &Connection, event_id: &str, email: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM faces WHERE event_id = ?1 AND email = ?2 LIMIT 1",
            params![event_id, email],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
