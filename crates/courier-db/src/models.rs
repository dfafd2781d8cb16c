/// Database row types that have no counterpart in courier-types.
/// Users, settings, chats and statistics map straight onto the shared models.
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub remote_message_id: i64,
    pub chat_id: i64,
    pub owner_remote_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub media_type: Option<String>,
    pub media_path: Option<String>,
    pub forwarded: bool,
    pub forwarded_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Result of `save_message`: the row id and its forward state after the
/// upsert. A redelivered message that was already forwarded reports true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedMessage {
    pub id: i64,
    pub forwarded: bool,
}

#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub token: String,
    pub phone_hash: String,
    pub provider_code_handle: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub struct ActionLogEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action_type: String,
    pub target_id: Option<i64>,
    pub target_type: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Counts produced by one maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub challenges_deleted: usize,
    pub actions_pruned: usize,
    pub users_deactivated: usize,
}
