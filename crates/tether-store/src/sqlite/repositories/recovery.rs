//! Recovery snapshot repository.
//!
//! One row per workspace: the latest crash-recovery snapshot of in-flight
//! state. Overwritten on every save and cleared once the state is safely
//! persisted through the normal path.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::Result;
use crate::sqlite::row_types::RecoveryRow;

/// Recovery repository, stateless. Every method takes `&Connection`.
pub struct RecoveryRepo;

impl RecoveryRepo {
    /// Save (or overwrite) the workspace's recovery snapshot.
    pub fn put(conn: &Connection, row: &RecoveryRow) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO recovery (workspace_id, session_id, control_state, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(workspace_id) DO UPDATE SET
               session_id    = excluded.session_id,
               control_state = excluded.control_state,
               payload       = excluded.payload,
               updated_at    = excluded.updated_at",
            params![
                row.workspace_id,
                row.session_id,
                row.control_state,
                row.payload,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get the workspace's recovery snapshot, if one exists.
    pub fn get(conn: &Connection, workspace_id: &str) -> Result<Option<RecoveryRow>> {
        let row = conn
            .query_row(
                "SELECT workspace_id, session_id, control_state, payload, updated_at
                 FROM recovery WHERE workspace_id = ?1",
                params![workspace_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Clear the workspace's recovery snapshot.
    pub fn clear(conn: &Connection, workspace_id: &str) -> Result<bool> {
        let affected = conn.execute(
            "DELETE FROM recovery WHERE workspace_id = ?1",
            params![workspace_id],
        )?;
        Ok(affected > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<RecoveryRow> {
        Ok(RecoveryRow {
            workspace_id: row.get(0)?,
            session_id: row.get(1)?,
            control_state: row.get(2)?,
            payload: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;
    use rusqlite::Connection;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn row(workspace_id: &str, session_id: &str) -> RecoveryRow {
        RecoveryRow {
            workspace_id: workspace_id.to_string(),
            session_id: Some(session_id.to_string()),
            control_state: "running".to_string(),
            payload: r#"{"events":[]}"#.to_string(),
            updated_at: 1_000,
        }
    }

    #[test]
    fn put_then_get() {
        let conn = open();
        RecoveryRepo::put(&conn, &row("ws-1", "s-1")).unwrap();
        let fetched = RecoveryRepo::get(&conn, "ws-1").unwrap().unwrap();
        assert_eq!(fetched.session_id.as_deref(), Some("s-1"));
        assert_eq!(fetched.control_state, "running");
    }

    #[test]
    fn put_overwrites_previous_snapshot() {
        let conn = open();
        RecoveryRepo::put(&conn, &row("ws-1", "s-1")).unwrap();
        let mut second = row("ws-1", "s-2");
        second.control_state = "paused".to_string();
        RecoveryRepo::put(&conn, &second).unwrap();
        let fetched = RecoveryRepo::get(&conn, "ws-1").unwrap().unwrap();
        assert_eq!(fetched.session_id.as_deref(), Some("s-2"));
        assert_eq!(fetched.control_state, "paused");
    }

    #[test]
    fn clear_removes_snapshot() {
        let conn = open();
        RecoveryRepo::put(&conn, &row("ws-1", "s-1")).unwrap();
        assert!(RecoveryRepo::clear(&conn, "ws-1").unwrap());
        assert!(!RecoveryRepo::clear(&conn, "ws-1").unwrap());
        assert!(RecoveryRepo::get(&conn, "ws-1").unwrap().is_none());
    }

    #[test]
    fn snapshots_are_per_workspace() {
        let conn = open();
        RecoveryRepo::put(&conn, &row("ws-1", "s-1")).unwrap();
        RecoveryRepo::put(&conn, &row("ws-2", "s-2")).unwrap();
        assert_eq!(
            RecoveryRepo::get(&conn, "ws-1")
                .unwrap()
                .unwrap()
                .session_id
                .as_deref(),
            Some("s-1")
        );
        assert_eq!(
            RecoveryRepo::get(&conn, "ws-2")
                .unwrap()
                .unwrap()
                .session_id
                .as_deref(),
            Some("s-2")
        );
    }
}
