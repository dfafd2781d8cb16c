use courier_types::models::MessageRecord;
use rusqlite::Row;

use crate::models::{SavedMessage, StoredMessage};
use crate::{
    Database, OptionalExt, Result, StoreError, from_sql_time, from_sql_time_opt, to_sql_time,
};

const MESSAGE_COLUMNS: &str = "id, remote_message_id, chat_id, owner_remote_id, sender_id,
    sent_at, edited_at, text, media_type, media_path, is_forwarded, forwarded_at,
    is_deleted, deleted_at";

impl Database {
    /// Upsert by the natural key `(remote_message_id, chat_id)`.
    ///
    /// A redelivered or edited message updates the existing row in place:
    /// text and raw payload are replaced, the edit timestamp only moves
    /// forward, and forward state never regresses from true to false.
    /// Returns the row id and the stored forward state either way.
    pub fn save_message(&self, record: &MessageRecord) -> Result<SavedMessage> {
        let op = "save_message";
        let raw = serde_json::to_string(&record.raw)
            .map_err(|source| StoreError::Serialisation { op, source })?;

        self.with_tx(op, |conn| {
            conn.query_row(
                "INSERT INTO messages
                    (remote_message_id, chat_id, owner_remote_id, sender_id, sent_at, edited_at,
                     text, media_type, media_path, media_sha256, is_forwarded, forwarded_at, raw)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(remote_message_id, chat_id) DO UPDATE SET
                    text         = excluded.text,
                    edited_at    = COALESCE(excluded.edited_at, messages.edited_at),
                    media_type   = COALESCE(excluded.media_type, messages.media_type),
                    media_path   = COALESCE(excluded.media_path, messages.media_path),
                    media_sha256 = COALESCE(excluded.media_sha256, messages.media_sha256),
                    is_forwarded = MAX(messages.is_forwarded, excluded.is_forwarded),
                    forwarded_at = COALESCE(messages.forwarded_at, excluded.forwarded_at),
                    raw          = excluded.raw,
                    updated_at   = datetime('now')
                 RETURNING id, is_forwarded",
                rusqlite::params![
                    record.remote_message_id,
                    record.chat_id,
                    record.owner_remote_id,
                    record.sender_id,
                    to_sql_time(record.sent_at),
                    record.edited_at.map(to_sql_time),
                    record.text,
                    record.media.kind(),
                    record.media_path,
                    record.media_sha256,
                    record.forwarded,
                    record.forwarded_at.map(to_sql_time),
                    raw
                ],
                |row| {
                    Ok(SavedMessage {
                        id: row.get(0)?,
                        forwarded: row.get(1)?,
                    })
                },
            )
        })
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn mark_forwarded(&self, message_id: i64) -> Result<bool> {
        self.with_tx("mark_forwarded", |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET is_forwarded = 1, forwarded_at = datetime('now'), updated_at = datetime('now')
                 WHERE id = ?1 AND is_forwarded = 0",
                [message_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Deletions may reference messages sent before monitoring began; those
    /// match no row and are ignored.
    pub fn mark_deleted(&self, chat_id: i64, remote_message_id: i64) -> Result<bool> {
        self.with_tx("mark_deleted", |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET is_deleted = 1, deleted_at = datetime('now'), updated_at = datetime('now')
                 WHERE chat_id = ?1 AND remote_message_id = ?2 AND is_deleted = 0",
                [chat_id, remote_message_id],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_message(&self, chat_id: i64, remote_message_id: i64) -> Result<Option<StoredMessage>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 AND remote_message_id = ?2",
            MESSAGE_COLUMNS
        );
        self.with_conn("get_message", |conn| {
            conn.query_row(&sql, [chat_id, remote_message_id], message_from_row)
                .optional()
        })
    }

    /// Newest first, by send time.
    pub fn messages_in_chat(&self, chat_id: i64, limit: u32) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY sent_at DESC, id DESC LIMIT ?2",
            MESSAGE_COLUMNS
        );
        self.with_conn("messages_in_chat", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id, limit], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        remote_message_id: row.get(1)?,
        chat_id: row.get(2)?,
        owner_remote_id: row.get(3)?,
        sender_id: row.get(4)?,
        sent_at: from_sql_time(&row.get::<_, String>(5)?),
        edited_at: from_sql_time_opt(row.get(6)?),
        text: row.get(7)?,
        media_type: row.get(8)?,
        media_path: row.get(9)?,
        forwarded: row.get(10)?,
        forwarded_at: from_sql_time_opt(row.get(11)?),
        deleted: row.get(12)?,
        deleted_at: from_sql_time_opt(row.get(13)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use courier_types::models::Media;

    fn record(text: &str) -> MessageRecord {
        MessageRecord {
            owner_remote_id: 1001,
            remote_message_id: 42,
            chat_id: 7,
            sender_id: Some(555),
            sent_at: Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap(),
            edited_at: None,
            text: Some(text.to_string()),
            media: Media::None,
            media_path: None,
            media_sha256: None,
            forwarded: false,
            forwarded_at: None,
            raw: serde_json::json!({ "text": text }),
        }
    }

    fn row_count(db: &Database) -> i64 {
        db.with_conn("count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        })
        .unwrap()
    }

    #[test]
    fn saving_twice_updates_one_row() {
        let db = Database::open_in_memory().unwrap();
        let first = db.save_message(&record("first")).unwrap();
        let second = db.save_message(&record("second")).unwrap();

        assert_eq!(first, second);
        assert_eq!(row_count(&db), 1);
        let stored = db.get_message(7, 42).unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("second"));
    }

    #[test]
    fn same_message_id_in_another_chat_is_a_new_row() {
        let db = Database::open_in_memory().unwrap();
        let a = db.save_message(&record("a")).unwrap();
        let b = db
            .save_message(&MessageRecord {
                chat_id: 8,
                ..record("b")
            })
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(row_count(&db), 2);
    }

    #[test]
    fn edit_sets_timestamp_and_keeps_forward_state() {
        let db = Database::open_in_memory().unwrap();
        let saved = db.save_message(&record("original")).unwrap();
        assert!(!saved.forwarded);
        assert!(db.mark_forwarded(saved.id).unwrap());

        let edited_at = Utc.with_ymd_and_hms(2026, 4, 1, 12, 5, 0).unwrap();
        let resaved = db
            .save_message(&MessageRecord {
                edited_at: Some(edited_at),
                ..record("edited")
            })
            .unwrap();
        assert_eq!(resaved, SavedMessage { id: saved.id, forwarded: true });

        let stored = db.get_message(7, 42).unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("edited"));
        assert_eq!(stored.edited_at, Some(edited_at));
        assert!(stored.forwarded);
        assert!(stored.forwarded_at.is_some());
    }

    #[test]
    fn mark_forwarded_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let id = db.save_message(&record("x")).unwrap().id;

        assert!(db.mark_forwarded(id).unwrap());
        let first_at = db.get_message(7, 42).unwrap().unwrap().forwarded_at;
        assert!(!db.mark_forwarded(id).unwrap());
        assert_eq!(db.get_message(7, 42).unwrap().unwrap().forwarded_at, first_at);
    }

    #[test]
    fn delete_keeps_the_row() {
        let db = Database::open_in_memory().unwrap();
        db.save_message(&record("bye")).unwrap();

        assert!(db.mark_deleted(7, 42).unwrap());
        let stored = db.get_message(7, 42).unwrap().unwrap();
        assert!(stored.deleted);
        assert!(stored.deleted_at.is_some());
        assert_eq!(stored.text.as_deref(), Some("bye"));
    }

    #[test]
    fn deleting_unknown_message_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.mark_deleted(7, 9999).unwrap());
        assert_eq!(row_count(&db), 0);
    }

    #[test]
    fn media_descriptor_is_stored() {
        let db = Database::open_in_memory().unwrap();
        db.save_message(&MessageRecord {
            media: Media::Photo {
                photo_id: Some(3),
                size: 100,
            },
            media_path: Some("media/1001/7_42".into()),
            ..record("pic")
        })
        .unwrap();

        let listed = db.messages_in_chat(7, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].media_type.as_deref(), Some("photo"));
        assert_eq!(listed[0].media_path.as_deref(), Some("media/1001/7_42"));
    }
}
