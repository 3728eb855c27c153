//! Session repository.
//!
//! Sessions carry denormalized metadata (task, completion, event count) so
//! session list queries never touch the events table. `completed_at` is
//! write-once: an upsert never clears or overwrites a set value.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::Result;
use crate::sqlite::row_types::SessionRow;

/// Options for listing sessions.
#[derive(Default)]
pub struct ListSessionsOptions<'a> {
    /// Filter by instance.
    pub instance_id: Option<&'a str>,
    /// Filter by completion state.
    pub completed: Option<bool>,
    /// Maximum results.
    pub limit: Option<i64>,
}

/// Session repository, stateless. Every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert or update a session.
    ///
    /// On conflict, metadata is refreshed but `completed_at` only moves from
    /// NULL to a value, never the reverse and never to a different value.
    pub fn upsert(conn: &Connection, row: &SessionRow) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO sessions (id, instance_id, workspace_id, task_id, task_title,
                                   created_at, completed_at, event_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               instance_id  = excluded.instance_id,
               workspace_id = excluded.workspace_id,
               task_id      = excluded.task_id,
               task_title   = excluded.task_title,
               completed_at = COALESCE(sessions.completed_at, excluded.completed_at),
               event_count  = excluded.event_count,
               updated_at   = excluded.updated_at",
            params![
                row.id,
                row.instance_id,
                row.workspace_id,
                row.task_id,
                row.task_title,
                row.created_at,
                row.completed_at,
                row.event_count,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a session by ID.
    pub fn get_by_id(conn: &Connection, session_id: &str) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                "SELECT id, instance_id, workspace_id, task_id, task_title,
                        created_at, completed_at, event_count, updated_at
                 FROM sessions WHERE id = ?1",
                params![session_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List sessions, newest first.
    pub fn list(conn: &Connection, opts: &ListSessionsOptions<'_>) -> Result<Vec<SessionRow>> {
        use std::fmt::Write;
        let mut sql = String::from(
            "SELECT id, instance_id, workspace_id, task_id, task_title,
                    created_at, completed_at, event_count, updated_at
             FROM sessions WHERE 1=1",
        );
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(instance_id) = opts.instance_id {
            let _ = write!(sql, " AND instance_id = ?{}", param_values.len() + 1);
            param_values.push(Box::new(instance_id.to_string()));
        }
        if let Some(completed) = opts.completed {
            if completed {
                sql.push_str(" AND completed_at IS NOT NULL");
            } else {
                sql.push_str(" AND completed_at IS NULL");
            }
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = opts.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(params_refs.as_slice(), Self::map_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Update the denormalized event count.
    pub fn set_event_count(conn: &Connection, session_id: &str, event_count: i64) -> Result<()> {
        let _ = conn.execute(
            "UPDATE sessions SET event_count = ?2 WHERE id = ?1",
            params![session_id, event_count],
        )?;
        Ok(())
    }

    /// Delete a session and (via foreign key cascade) its events.
    pub fn delete(conn: &Connection, session_id: &str) -> Result<bool> {
        let affected = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(affected > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            instance_id: row.get(1)?,
            workspace_id: row.get(2)?,
            task_id: row.get(3)?,
            task_title: row.get(4)?,
            created_at: row.get(5)?,
            completed_at: row.get(6)?,
            event_count: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
