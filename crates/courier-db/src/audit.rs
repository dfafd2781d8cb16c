use rusqlite::Connection;

use crate::models::ActionLogEntry;
use crate::{Database, Result, from_sql_time};

pub const USER_ADDED: &str = "USER_ADDED";
pub const CONSENT_GIVEN: &str = "CONSENT_GIVEN";
pub const SETTINGS_UPDATED: &str = "SETTINGS_UPDATED";
pub const MONITORING_STARTED: &str = "MONITORING_STARTED";
pub const MONITORING_STOPPED: &str = "MONITORING_STOPPED";

/// Append-only audit record. Entries are never updated, only pruned by age.
#[derive(Debug, Clone, Copy)]
pub struct Action<'a> {
    pub user_id: Option<i64>,
    pub action_type: &'a str,
    pub target_id: Option<i64>,
    pub target_type: Option<&'a str>,
    pub details: Option<&'a str>,
}

impl<'a> Action<'a> {
    pub fn new(action_type: &'a str) -> Self {
        Self {
            user_id: None,
            action_type,
            target_id: None,
            target_type: None,
            details: None,
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn target(mut self, target_type: &'a str, target_id: i64) -> Self {
        self.target_type = Some(target_type);
        self.target_id = Some(target_id);
        self
    }

    pub fn details(mut self, details: &'a str) -> Self {
        self.details = Some(details);
        self
    }
}

/// Insert within an already open transaction so the audit entry commits or
/// rolls back together with the change it describes.
pub(crate) fn insert_action(conn: &Connection, action: &Action<'_>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO action_logs (user_id, action_type, target_id, target_type, details)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            action.user_id,
            action.action_type,
            action.target_id,
            action.target_type,
            action.details
        ],
    )?;
    Ok(())
}

impl Database {
    pub fn log_action(&self, action: Action<'_>) -> Result<()> {
        self.with_tx("log_action", |conn| insert_action(conn, &action))
    }

    /// Newest first.
    pub fn recent_actions(&self, limit: u32) -> Result<Vec<ActionLogEntry>> {
        self.with_conn("recent_actions", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, action_type, target_id, target_type, details, created_at
                 FROM action_logs
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map([limit], |row| {
                    Ok(ActionLogEntry {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        action_type: row.get(2)?,
                        target_id: row.get(3)?,
                        target_type: row.get(4)?,
                        details: row.get(5)?,
                        created_at: from_sql_time(&row.get::<_, String>(6)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows)
        })
    }
}
