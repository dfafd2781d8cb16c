use courier_types::models::{ChatKind, ChatRecord};

use crate::{Database, OptionalExt, Result, from_sql_time_opt, to_sql_time};

impl Database {
    /// Insert or refresh a chat keyed by its remote id. The monitoring flag
    /// is only set on insert; later upserts leave an operator's choice alone.
    /// `last_message_at` never moves backwards.
    pub fn upsert_chat(&self, chat: &ChatRecord) -> Result<i64> {
        let last_message_at = chat.last_message_at.map(to_sql_time);

        self.with_tx("upsert_chat", |conn| {
            conn.query_row(
                "INSERT INTO chats
                    (remote_id, kind, title, username, participant_count, is_monitored,
                     last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(remote_id) DO UPDATE SET
                    kind              = excluded.kind,
                    title             = COALESCE(excluded.title, chats.title),
                    username          = COALESCE(excluded.username, chats.username),
                    participant_count = excluded.participant_count,
                    last_message_at   = CASE
                        WHEN excluded.last_message_at IS NULL THEN chats.last_message_at
                        WHEN chats.last_message_at IS NULL
                            OR excluded.last_message_at > chats.last_message_at
                            THEN excluded.last_message_at
                        ELSE chats.last_message_at
                    END
                 RETURNING id",
                rusqlite::params![
                    chat.remote_id,
                    chat.kind.as_str(),
                    chat.title,
                    chat.username,
                    chat.participant_count,
                    chat.monitored,
                    last_message_at
                ],
                |row| row.get(0),
            )
        })
    }

    pub fn get_chat(&self, remote_id: i64) -> Result<Option<ChatRecord>> {
        self.with_conn("get_chat", |conn| {
            conn.query_row(
                "SELECT remote_id, kind, title, username, participant_count, is_monitored,
                        last_message_at
                 FROM chats WHERE remote_id = ?1",
                [remote_id],
                |row| {
                    let kind: String = row.get(1)?;
                    let kind = kind.parse::<ChatKind>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?;

                    Ok(ChatRecord {
                        remote_id: row.get(0)?,
                        kind,
                        title: row.get(2)?,
                        username: row.get(3)?,
                        participant_count: row.get(4)?,
                        monitored: row.get(5)?,
                        last_message_at: from_sql_time_opt(row.get(6)?),
                    })
                },
            )
            .optional()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn chat(title: Option<&str>, day: u32) -> ChatRecord {
        ChatRecord {
            remote_id: -100_500,
            kind: ChatKind::Supergroup,
            title: title.map(str::to_string),
            username: None,
            participant_count: 12,
            monitored: true,
            last_message_at: Some(Utc.with_ymd_and_hms(2026, 5, day, 9, 0, 0).unwrap()),
        }
    }

    #[test]
    fn upsert_keeps_one_row_per_remote_id() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_chat(&chat(Some("Ops"), 2)).unwrap();
        let second = db.upsert_chat(&chat(None, 3)).unwrap();
        assert_eq!(first, second);

        let stored = db.get_chat(-100_500).unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Ops"));
        assert_eq!(stored.kind, ChatKind::Supergroup);
        assert_eq!(
            stored.last_message_at,
            Some(Utc.with_ymd_and_hms(2026, 5, 3, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn last_message_at_never_regresses() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_chat(&chat(Some("Ops"), 10)).unwrap();
        db.upsert_chat(&chat(Some("Ops"), 4)).unwrap();

        let stored = db.get_chat(-100_500).unwrap().unwrap();
        assert_eq!(
            stored.last_message_at,
            Some(Utc.with_ymd_and_hms(2026, 5, 10, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn unknown_chat_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_chat(1).unwrap().is_none());
    }
}
