use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatKind, Media};

/// Events a transport delivers for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TransportEvent {
    /// An incoming message arrived
    NewMessage(IncomingMessage),

    /// A previously delivered message was edited
    MessageEdited(IncomingMessage),

    /// Messages were deleted. Only identifiers are known, never content.
    MessagesDeleted { chat_id: i64, message_ids: Vec<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    New,
    Edited,
    Deleted,
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage(_) => EventKind::New,
            Self::MessageEdited(_) => EventKind::Edited,
            Self::MessagesDeleted { .. } => EventKind::Deleted,
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Self::NewMessage(msg) | Self::MessageEdited(msg) => msg.chat.id,
            Self::MessagesDeleted { chat_id, .. } => *chat_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: ChatInfo,
    pub sender: Option<SenderInfo>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub edit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Media,
    /// Opaque handle the transport resolves back into the media payload.
    #[serde(default)]
    pub media_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_participants")]
    pub participant_count: i64,
}

fn default_participants() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl SenderInfo {
    /// Best human-readable name: "First Last", then "@username", then the id.
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full.is_empty() {
            full
        } else if let Some(username) = &self.username {
            format!("@{}", username)
        } else {
            self.id.to_string()
        }
    }
}
