use courier_types::models::Statistics;
use tracing::debug;

use crate::models::ReapReport;
use crate::{Database, Result, from_sql_time_opt};

impl Database {
    /// Periodic cleanup, run by the maintenance loop:
    /// - challenges expired more than a day ago are deleted
    /// - audit entries older than 90 days are pruned
    /// - users idle for 30 days are deactivated
    pub fn reap_expired(&self) -> Result<ReapReport> {
        let report = self.with_tx("reap_expired", |conn| {
            let challenges_deleted = conn.execute(
                "DELETE FROM auth_challenges WHERE expires_at < datetime('now', '-1 day')",
                [],
            )?;

            let actions_pruned = conn.execute(
                "DELETE FROM action_logs WHERE created_at < datetime('now', '-90 days')",
                [],
            )?;

            let users_deactivated = conn.execute(
                "UPDATE users SET is_active = 0
                 WHERE is_active = 1 AND last_active < datetime('now', '-30 days')",
                [],
            )?;

            Ok(ReapReport {
                challenges_deleted,
                actions_pruned,
                users_deactivated,
            })
        })?;

        debug!(?report, "Reaped expired rows");
        Ok(report)
    }

    pub fn statistics(&self) -> Result<Statistics> {
        self.with_conn("statistics", |conn| {
            let (active_users, last_activity): (i64, Option<String>) = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM users WHERE is_active = 1),
                        (SELECT MAX(last_active) FROM users)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let (total_messages, forwarded_messages): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_forwarded), 0) FROM messages",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let monitored_chats: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chats WHERE is_monitored = 1",
                [],
                |row| row.get(0),
            )?;

            Ok(Statistics {
                active_users,
                total_messages,
                forwarded_messages,
                monitored_chats,
                last_activity: from_sql_time_opt(last_activity),
            })
        })
    }
}
