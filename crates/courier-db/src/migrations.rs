use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id       INTEGER NOT NULL UNIQUE,
                phone_hash      TEXT NOT NULL UNIQUE,
                credential      TEXT NOT NULL,
                first_name      TEXT,
                last_name       TEXT,
                username        TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                last_active     TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                consent_given   INTEGER NOT NULL DEFAULT 0,
                consent_at      TEXT
            );

            CREATE TABLE user_settings (
                user_id         INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                forward_media   INTEGER NOT NULL DEFAULT 1,
                forward_edited  INTEGER NOT NULL DEFAULT 1,
                keywords        TEXT NOT NULL DEFAULT '[]',
                excluded_chats  TEXT NOT NULL DEFAULT '[]',
                notifications   INTEGER NOT NULL DEFAULT 1,
                retention_days  INTEGER NOT NULL DEFAULT 30,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE chats (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id           INTEGER NOT NULL UNIQUE,
                kind                TEXT NOT NULL
                    CHECK (kind IN ('private', 'group', 'channel', 'supergroup')),
                title               TEXT,
                username            TEXT,
                participant_count   INTEGER NOT NULL DEFAULT 1,
                is_monitored        INTEGER NOT NULL DEFAULT 1,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                last_message_at     TEXT
            );

            CREATE TABLE messages (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_message_id   INTEGER NOT NULL,
                chat_id             INTEGER NOT NULL,
                owner_remote_id     INTEGER,
                sender_id           INTEGER,
                sent_at             TEXT NOT NULL,
                edited_at           TEXT,
                text                TEXT,
                media_type          TEXT,
                media_path          TEXT,
                media_sha256        TEXT,
                is_forwarded        INTEGER NOT NULL DEFAULT 0,
                forwarded_at        TEXT,
                is_deleted          INTEGER NOT NULL DEFAULT 0,
                deleted_at          TEXT,
                raw                 TEXT NOT NULL DEFAULT '{}',
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (remote_message_id, chat_id)
            );

            CREATE INDEX idx_messages_chat_date ON messages(chat_id, sent_at);
            CREATE INDEX idx_messages_sender_date ON messages(sender_id, sent_at);

            CREATE TABLE auth_challenges (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                token                   TEXT NOT NULL UNIQUE,
                phone_hash              TEXT NOT NULL,
                provider_code_handle    TEXT NOT NULL,
                created_at              TEXT NOT NULL DEFAULT (datetime('now')),
                expires_at              TEXT NOT NULL,
                is_verified             INTEGER NOT NULL DEFAULT 0,
                verified_at             TEXT,
                user_remote_id          INTEGER
            );

            CREATE INDEX idx_auth_challenges_expiry ON auth_challenges(expires_at);

            CREATE TABLE action_logs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER,
                action_type TEXT NOT NULL,
                target_id   INTEGER,
                target_type TEXT,
                details     TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_action_logs_user_action ON action_logs(user_id, action_type);
            CREATE INDEX idx_action_logs_created ON action_logs(created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
