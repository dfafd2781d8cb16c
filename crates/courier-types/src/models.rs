use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display fields reported by the remote service for a monitored account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// A monitored account joined with its settings row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub remote_id: i64,
    pub phone_hash: String,
    /// Vault envelope, never the clear credential.
    pub encrypted_credential: String,
    pub profile: Profile,
    pub active: bool,
    pub consent: bool,
    pub consent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
    pub settings: UserSettings,
}

/// Per-user filtering and forwarding policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub forward_media: bool,
    pub forward_edited: bool,
    /// Matched case-insensitively as substrings. Empty means "everything".
    pub keywords: Vec<String>,
    pub excluded_chats: BTreeSet<i64>,
    pub notifications: bool,
    pub retention_days: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            forward_media: true,
            forward_edited: true,
            keywords: Vec::new(),
            excluded_chats: BTreeSet::new(),
            notifications: true,
            retention_days: 30,
        }
    }
}

impl UserSettings {
    pub fn is_excluded(&self, chat_id: i64) -> bool {
        self.excluded_chats.contains(&chat_id)
    }

    /// True when the keyword list is empty or any keyword occurs in `text`.
    pub fn matches_keywords(&self, text: Option<&str>) -> bool {
        if self.keywords.is_empty() {
            return true;
        }

        let haystack = text.unwrap_or_default().to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| haystack.contains(&keyword.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
    Supergroup,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Supergroup => "supergroup",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            "supergroup" => Ok(Self::Supergroup),
            other => Err(format!("unknown chat kind: {}", other)),
        }
    }
}

/// A remote conversation, upserted whenever a message arrives from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub remote_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
    pub participant_count: i64,
    pub monitored: bool,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Normalized media attached to a message.
///
/// Built once at the transport boundary; nothing downstream inspects the
/// transport's own media types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Media {
    #[default]
    None,
    Photo {
        photo_id: Option<i64>,
        #[serde(default)]
        size: u64,
    },
    Document {
        mime_type: Option<String>,
        #[serde(default)]
        size: u64,
        file_name: Option<String>,
    },
    Geo {
        lat: f64,
        long: f64,
    },
    Contact {
        phone_number: String,
        first_name: Option<String>,
        last_name: Option<String>,
    },
}

impl Media {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Stored in the `media_type` column; `None` for messages without media.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Photo { .. } => Some("photo"),
            Self::Document { .. } => Some("document"),
            Self::Geo { .. } => Some("geo"),
            Self::Contact { .. } => Some("contact"),
        }
    }

    /// Photos and documents carry a downloadable payload; geo and contact
    /// are fully described by their fields.
    pub fn has_payload(&self) -> bool {
        matches!(self, Self::Photo { .. } | Self::Document { .. })
    }
}

/// Normalized message about to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub owner_remote_id: i64,
    pub remote_message_id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub media: Media,
    pub media_path: Option<String>,
    pub media_sha256: Option<String>,
    pub forwarded: bool,
    pub forwarded_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

/// Read-only aggregate over the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub active_users: i64,
    pub total_messages: i64,
    pub forwarded_messages: i64,
    pub monitored_chats: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Lifecycle of one user's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
}

impl SessionState {
    /// Running and Degraded both count as a live session: the registry still
    /// owns a connection handle and a supervising task.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }
}
