use std::collections::BTreeSet;

use courier_types::models::{Profile, User, UserSettings};
use rusqlite::{Connection, Row};
use sha2::{Digest, Sha256};

use crate::audit::{Action, CONSENT_GIVEN, SETTINGS_UPDATED, USER_ADDED, insert_action};
use crate::{
    Database, OptionalExt, Result, StoreError, from_sql_time, from_sql_time_opt, json_column_error,
};

/// Stable fingerprint of a phone number. The clear number is never stored.
pub fn hash_phone(phone: &str) -> String {
    hex::encode(Sha256::digest(phone.as_bytes()))
}

/// Keep the first two and last two digits: `+79161234567` -> `+7********67`.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return phone.to_string();
    }

    let mut masked: String = chars[..2].iter().collect();
    masked.push_str(&"*".repeat(chars.len() - 4));
    masked.extend(&chars[chars.len() - 2..]);
    masked
}

const USER_COLUMNS: &str = "u.id, u.remote_id, u.phone_hash, u.credential,
    u.first_name, u.last_name, u.username, u.is_active, u.consent_given, u.consent_at,
    u.created_at, u.last_active,
    s.forward_media, s.forward_edited, s.keywords, s.excluded_chats, s.notifications,
    s.retention_days";

impl Database {
    // -- Users --

    /// Insert or replace the user keyed by `remote_id`, make sure a settings
    /// row exists, and audit the change with the phone masked.
    pub fn upsert_user(
        &self,
        remote_id: i64,
        phone: &str,
        encrypted_credential: &str,
        profile: &Profile,
    ) -> Result<i64> {
        let phone_hash = hash_phone(phone);
        let details = serde_json::json!({ "phone": mask_phone(phone) }).to_string();

        self.with_tx("upsert_user", |conn| {
            let user_id: i64 = conn.query_row(
                "INSERT INTO users
                    (remote_id, phone_hash, credential, first_name, last_name, username,
                     last_active, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'), 1)
                 ON CONFLICT(remote_id) DO UPDATE SET
                    phone_hash  = excluded.phone_hash,
                    credential  = excluded.credential,
                    first_name  = excluded.first_name,
                    last_name   = excluded.last_name,
                    username    = excluded.username,
                    last_active = excluded.last_active,
                    is_active   = 1
                 RETURNING id",
                rusqlite::params![
                    remote_id,
                    phone_hash,
                    encrypted_credential,
                    profile.first_name,
                    profile.last_name,
                    profile.username
                ],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT OR IGNORE INTO user_settings (user_id) VALUES (?1)",
                [user_id],
            )?;

            insert_action(
                conn,
                &Action::new(USER_ADDED)
                    .user(user_id)
                    .target("remote_user", remote_id)
                    .details(&details),
            )?;

            Ok(user_id)
        })
    }

    /// Active user joined with settings; `None` when absent or deactivated.
    pub fn get_user_by_remote_id(&self, remote_id: i64) -> Result<Option<User>> {
        self.with_conn("get_user_by_remote_id", |conn| query_active_user(conn, remote_id))
    }

    pub fn touch_user_activity(&self, remote_id: i64) -> Result<()> {
        self.with_tx("touch_user_activity", |conn| {
            conn.execute(
                "UPDATE users SET last_active = datetime('now') WHERE remote_id = ?1",
                [remote_id],
            )?;
            Ok(())
        })
    }

    /// Record that the user agreed to monitoring. Returns false for unknown
    /// or deactivated users. The first consent timestamp is kept.
    pub fn record_consent(&self, remote_id: i64) -> Result<bool> {
        self.with_tx("record_consent", |conn| {
            let user_id: Option<i64> = conn
                .query_row(
                    "UPDATE users
                     SET consent_given = 1, consent_at = COALESCE(consent_at, datetime('now'))
                     WHERE remote_id = ?1 AND is_active = 1
                     RETURNING id",
                    [remote_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(user_id) = user_id else {
                return Ok(false);
            };

            insert_action(
                conn,
                &Action::new(CONSENT_GIVEN).user(user_id).target("remote_user", remote_id),
            )?;
            Ok(true)
        })
    }

    /// Remote ids of active users with consent on record, for session resume
    /// at boot.
    pub fn list_resumable_users(&self) -> Result<Vec<i64>> {
        self.with_conn("list_resumable_users", |conn| {
            let mut stmt = conn.prepare(
                "SELECT remote_id FROM users
                 WHERE is_active = 1 AND consent_given = 1
                 ORDER BY remote_id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    // -- Settings --

    pub fn get_settings(&self, remote_id: i64) -> Result<Option<UserSettings>> {
        Ok(self.get_user_by_remote_id(remote_id)?.map(|user| user.settings))
    }

    /// Replace the user's settings. Returns false for unknown users.
    pub fn update_settings(&self, remote_id: i64, settings: &UserSettings) -> Result<bool> {
        let op = "update_settings";
        let keywords = normalize_keywords(&settings.keywords);
        let keywords_json = serde_json::to_string(&keywords)
            .map_err(|source| StoreError::Serialisation { op, source })?;
        let excluded_json = serde_json::to_string(&settings.excluded_chats)
            .map_err(|source| StoreError::Serialisation { op, source })?;

        self.with_tx(op, |conn| {
            let user_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE remote_id = ?1 AND is_active = 1",
                    [remote_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(user_id) = user_id else {
                return Ok(false);
            };

            conn.execute(
                "INSERT INTO user_settings
                    (user_id, forward_media, forward_edited, keywords, excluded_chats,
                     notifications, retention_days, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
                 ON CONFLICT(user_id) DO UPDATE SET
                    forward_media  = excluded.forward_media,
                    forward_edited = excluded.forward_edited,
                    keywords       = excluded.keywords,
                    excluded_chats = excluded.excluded_chats,
                    notifications  = excluded.notifications,
                    retention_days = excluded.retention_days,
                    updated_at     = excluded.updated_at",
                rusqlite::params![
                    user_id,
                    settings.forward_media,
                    settings.forward_edited,
                    keywords_json,
                    excluded_json,
                    settings.notifications,
                    settings.retention_days
                ],
            )?;

            insert_action(
                conn,
                &Action::new(SETTINGS_UPDATED).user(user_id).target("remote_user", remote_id),
            )?;
            Ok(true)
        })
    }
}

/// Trim, drop blanks and de-duplicate case-insensitively, keeping the first
/// spelling and the original order.
fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn query_active_user(conn: &Connection, remote_id: i64) -> rusqlite::Result<Option<User>> {
    let sql = format!(
        "SELECT {} FROM users u
         LEFT JOIN user_settings s ON s.user_id = u.id
         WHERE u.remote_id = ?1 AND u.is_active = 1",
        USER_COLUMNS
    );

    conn.query_row(&sql, [remote_id], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        remote_id: row.get(1)?,
        phone_hash: row.get(2)?,
        encrypted_credential: row.get(3)?,
        profile: Profile {
            first_name: row.get(4)?,
            last_name: row.get(5)?,
            username: row.get(6)?,
        },
        active: row.get(7)?,
        consent: row.get(8)?,
        consent_at: from_sql_time_opt(row.get(9)?),
        created_at: from_sql_time(&row.get::<_, String>(10)?),
        last_active: from_sql_time_opt(row.get(11)?),
        settings: settings_from_row(row, 12)?,
    })
}

/// Settings columns start at `base`. A missing settings row (LEFT JOIN
/// miss) decodes as defaults.
fn settings_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<UserSettings> {
    let defaults = UserSettings::default();

    let keywords = match row.get::<_, Option<String>>(base + 2)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| json_column_error(base + 2, e))?,
        None => defaults.keywords,
    };
    let excluded_chats = match row.get::<_, Option<String>>(base + 3)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| json_column_error(base + 3, e))?,
        None => defaults.excluded_chats,
    };

    Ok(UserSettings {
        forward_media: row.get::<_, Option<bool>>(base)?.unwrap_or(defaults.forward_media),
        forward_edited: row.get::<_, Option<bool>>(base + 1)?.unwrap_or(defaults.forward_edited),
        keywords,
        excluded_chats,
        notifications: row.get::<_, Option<bool>>(base + 4)?.unwrap_or(defaults.notifications),
        retention_days: row.get::<_, Option<u32>>(base + 5)?.unwrap_or(defaults.retention_days),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::USER_ADDED;

    fn profile() -> Profile {
        Profile {
            first_name: Some("Ada".into()),
            last_name: None,
            username: Some("ada".into()),
        }
    }

    #[test]
    fn phone_masking() {
        assert_eq!(mask_phone("+79161234567"), "+7********67");
        assert_eq!(mask_phone("12345"), "12*45");
        assert_eq!(mask_phone("1234"), "1234");
    }

    #[test]
    fn phone_hash_is_sha256_hex() {
        let hash = hash_phone("+79161234567");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_phone("+79161234567"));
        assert_ne!(hash, hash_phone("+79161234568"));
    }

    #[test]
    fn upsert_creates_user_with_default_settings() {
        let db = Database::open_in_memory().unwrap();
        let id = db.upsert_user(1001, "+79161234567", "sealed", &profile()).unwrap();

        let user = db.get_user_by_remote_id(1001).unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.encrypted_credential, "sealed");
        assert_eq!(user.phone_hash, hash_phone("+79161234567"));
        assert!(user.active);
        assert!(!user.consent);
        assert!(user.last_active.is_some());
        assert_eq!(user.settings, UserSettings::default());
    }

    #[test]
    fn upsert_replaces_by_remote_id_and_keeps_settings() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_user(1001, "+79161234567", "old", &profile()).unwrap();

        let custom = UserSettings {
            keywords: vec!["urgent".into()],
            ..Default::default()
        };
        assert!(db.update_settings(1001, &custom).unwrap());

        let second = db.upsert_user(1001, "+79161234567", "new", &Profile::default()).unwrap();
        assert_eq!(first, second);

        let user = db.get_user_by_remote_id(1001).unwrap().unwrap();
        assert_eq!(user.encrypted_credential, "new");
        assert_eq!(user.profile, Profile::default());
        assert_eq!(user.settings.keywords, vec!["urgent".to_string()]);
    }

    #[test]
    fn audit_entry_masks_phone() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(1001, "+79161234567", "sealed", &profile()).unwrap();

        let actions = db.recent_actions(5).unwrap();
        assert_eq!(actions[0].action_type, USER_ADDED);
        let details = actions[0].details.clone().unwrap();
        assert!(details.contains("+7********67"));
        assert!(!details.contains("9161234567"));
    }

    #[test]
    fn inactive_users_are_hidden() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(1001, "+79161234567", "sealed", &profile()).unwrap();
        db.with_conn("deactivate", |conn| {
            conn.execute("UPDATE users SET is_active = 0 WHERE remote_id = 1001", [])
        })
        .unwrap();

        assert!(db.get_user_by_remote_id(1001).unwrap().is_none());
        assert!(db.get_user_by_remote_id(4242).unwrap().is_none());
    }

    #[test]
    fn consent_gates_resume_list() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(1, "+70000000001", "a", &profile()).unwrap();
        db.upsert_user(2, "+70000000002", "b", &profile()).unwrap();

        assert!(db.list_resumable_users().unwrap().is_empty());
        assert!(db.record_consent(2).unwrap());
        assert!(!db.record_consent(99).unwrap());

        assert_eq!(db.list_resumable_users().unwrap(), vec![2]);
        let user = db.get_user_by_remote_id(2).unwrap().unwrap();
        assert!(user.consent);
        assert!(user.consent_at.is_some());
    }

    #[test]
    fn settings_update_normalizes_keywords() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(1, "+70000000001", "a", &profile()).unwrap();

        let settings = UserSettings {
            forward_media: false,
            keywords: vec![" Urgent ".into(), "urgent".into(), "".into(), "invoice".into()],
            excluded_chats: [5, 9].into_iter().collect(),
            retention_days: 7,
            ..Default::default()
        };
        assert!(db.update_settings(1, &settings).unwrap());
        assert!(!db.update_settings(2, &settings).unwrap());

        let stored = db.get_settings(1).unwrap().unwrap();
        assert!(!stored.forward_media);
        assert_eq!(stored.keywords, vec!["Urgent".to_string(), "invoice".to_string()]);
        assert!(stored.is_excluded(9));
        assert_eq!(stored.retention_days, 7);
    }

    #[test]
    fn touch_updates_last_active() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(1, "+70000000001", "a", &profile()).unwrap();
        db.with_conn("age", |conn| {
            conn.execute("UPDATE users SET last_active = '2000-01-01 00:00:00'", [])
        })
        .unwrap();

        db.touch_user_activity(1).unwrap();
        let user = db.get_user_by_remote_id(1).unwrap().unwrap();
        assert!(user.last_active.unwrap().timestamp() > 946_684_800);
    }
}
