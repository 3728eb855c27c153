//! Event repository.
//!
//! Events are append-only and keyed by their stable ID, so a re-persist of
//! the same history is a no-op. Each row keeps the sequence it was first
//! inserted with and reads come back in that order, so reloads reproduce
//! the original write order even for events sharing a timestamp.

use rusqlite::{Connection, Row, params};

use crate::errors::Result;
use crate::sqlite::row_types::EventRow;

/// Event repository, stateless. Every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert an event, ignoring duplicates by ID.
    ///
    /// Returns true when a row was actually inserted.
    pub fn insert_ignore(conn: &Connection, row: &EventRow) -> Result<bool> {
        let affected = conn.execute(
            "INSERT OR IGNORE INTO events (id, session_id, sequence, timestamp, event_type, payload, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.session_id,
                row.sequence,
                row.timestamp,
                row.event_type,
                row.payload,
                row.inserted_at,
            ],
        )?;
        Ok(affected > 0)
    }

    /// List a session's events in first-insert sequence order.
    pub fn list_for_session(conn: &Connection, session_id: &str) -> Result<Vec<EventRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sequence, timestamp, event_type, payload, inserted_at
             FROM events WHERE session_id = ?1
             ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![session_id], Self::map_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Count a session's events.
    pub fn count_for_session(conn: &Connection, session_id: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            sequence: row.get(2)?,
            timestamp: row.get(3)?,
            event_type: row.get(4)?,
            payload: row.get(5)?,
            inserted_at: row.get(6)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
