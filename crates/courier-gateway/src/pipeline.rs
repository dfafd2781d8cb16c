use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use courier_db::Database;
use courier_types::events::{EventKind, IncomingMessage, TransportEvent};
use courier_types::models::{ChatRecord, Media, MessageRecord};

use crate::error::PipelineError;
use crate::media::{MediaStore, StagedMedia};
use crate::transport::Connection;

/// Which connection carries forwards to the admin recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForwardRoute {
    /// Any live session may deliver any user's forwards.
    #[default]
    Any,
    /// Only the session that observed the message; skipped while it is down.
    Owner,
}

impl FromStr for ForwardRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "owner" => Ok(Self::Owner),
            other => Err(format!("unknown forward route: {}", other)),
        }
    }
}

/// Where the pipeline looks up connections for forwarding and media
/// downloads. Implemented by the session registry.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Any one live connection, or `None` when no session is running.
    async fn sendable_connection(&self) -> Option<Arc<dyn Connection>>;

    /// The owner's own connection, if its session is running.
    async fn owner_connection(&self, owner: i64) -> Option<Arc<dyn Connection>>;
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `forwarded` is true only when this event produced an admin delivery.
    /// A redelivered message that was already forwarded reports false.
    Persisted { message_id: i64, forwarded: bool },
    /// The owner is unknown or deactivated. Nothing was written.
    Inactive,
    /// The chat is on the owner's exclusion list. Nothing was written.
    Excluded,
    /// No configured keyword matched. Nothing was written.
    FilteredOut,
    /// `matched` of the reported ids were known and are now flagged deleted.
    Deleted { matched: usize },
}

/// Filters, persists and forwards the events of every session.
///
/// Each session runs exactly one consumer that feeds this pipeline, so
/// events for one user are handled strictly in arrival order.
pub struct MessagePipeline {
    db: Arc<Database>,
    media: Option<Arc<MediaStore>>,
    admin_chat_id: i64,
    route: ForwardRoute,
}

impl MessagePipeline {
    pub fn new(db: Arc<Database>, admin_chat_id: i64) -> Self {
        Self {
            db,
            media: None,
            admin_chat_id,
            route: ForwardRoute::default(),
        }
    }

    pub fn with_media(mut self, media: Arc<MediaStore>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_route(mut self, route: ForwardRoute) -> Self {
        self.route = route;
        self
    }

    /// Route an event to the handler for its kind.
    pub async fn dispatch(
        &self,
        owner: i64,
        event: TransportEvent,
        source: &dyn ConnectionSource,
    ) -> Result<Outcome, PipelineError> {
        match event {
            TransportEvent::NewMessage(msg) => self.on_new_message(owner, msg, source).await,
            TransportEvent::MessageEdited(msg) => self.on_message_edited(owner, msg, source).await,
            TransportEvent::MessagesDeleted {
                chat_id,
                message_ids,
            } => self.on_messages_deleted(owner, chat_id, &message_ids).await,
        }
    }

    pub async fn on_new_message(
        &self,
        owner: i64,
        msg: IncomingMessage,
        source: &dyn ConnectionSource,
    ) -> Result<Outcome, PipelineError> {
        self.ingest(owner, msg, EventKind::New, source).await
    }

    pub async fn on_message_edited(
        &self,
        owner: i64,
        msg: IncomingMessage,
        source: &dyn ConnectionSource,
    ) -> Result<Outcome, PipelineError> {
        self.ingest(owner, msg, EventKind::Edited, source).await
    }

    /// Flag each reported message deleted. Nothing is forwarded: the remote
    /// service only reports identifiers.
    pub async fn on_messages_deleted(
        &self,
        owner: i64,
        chat_id: i64,
        message_ids: &[i64],
    ) -> Result<Outcome, PipelineError> {
        let mut matched = 0;
        for &message_id in message_ids {
            if self
                .store(move |db| db.mark_deleted(chat_id, message_id))
                .await?
            {
                matched += 1;
            }
        }

        debug!(
            "User {}: {} of {} deleted messages in chat {} were known",
            owner,
            matched,
            message_ids.len(),
            chat_id
        );
        Ok(Outcome::Deleted { matched })
    }

    async fn ingest(
        &self,
        owner: i64,
        msg: IncomingMessage,
        kind: EventKind,
        source: &dyn ConnectionSource,
    ) -> Result<Outcome, PipelineError> {
        let Some(settings) = self.store(move |db| db.get_settings(owner)).await? else {
            warn!("User {} is not active, dropping message {}", owner, msg.message_id);
            return Ok(Outcome::Inactive);
        };
        let chat_id = msg.chat.id;

        if settings.is_excluded(chat_id) {
            debug!("User {}: chat {} is excluded, dropping message {}", owner, chat_id, msg.message_id);
            return Ok(Outcome::Excluded);
        }

        // Edits of stored messages always go through; keywords gate new ones only.
        if kind == EventKind::New && !settings.matches_keywords(msg.text.as_deref()) {
            debug!("User {}: message {} in chat {} matched no keyword", owner, msg.message_id, chat_id);
            return Ok(Outcome::FilteredOut);
        }

        let chat = chat_record(&msg);
        self.store(move |db| db.upsert_chat(&chat)).await?;

        let staged = if settings.forward_media {
            self.stage_media(owner, &msg, source).await
        } else {
            None
        };

        let edited_at = match kind {
            EventKind::Edited => Some(msg.edit_date.unwrap_or_else(Utc::now)),
            _ => msg.edit_date,
        };
        let record = message_record(owner, &msg, edited_at, staged.as_ref());
        let saved = self.store(move |db| db.save_message(&record)).await?;
        let message_id = saved.id;

        let forwarded = match kind {
            EventKind::New if saved.forwarded => {
                debug!("User {}: message {} was already forwarded", owner, message_id);
                false
            }
            EventKind::New => {
                self.forward_new(owner, message_id, &msg, staged.as_ref(), source)
                    .await?
            }
            _ if settings.forward_edited => self.notify_edit(owner, &msg, source).await,
            _ => false,
        };

        Ok(Outcome::Persisted {
            message_id,
            forwarded,
        })
    }

    /// Deliver a new message to the admin and record it. Delivery problems
    /// are logged and leave the row unforwarded.
    async fn forward_new(
        &self,
        owner: i64,
        message_id: i64,
        msg: &IncomingMessage,
        staged: Option<&StagedMedia>,
        source: &dyn ConnectionSource,
    ) -> Result<bool, PipelineError> {
        let Some(conn) = self.forward_connection(owner, source).await else {
            info!(
                "User {}: no live connection for forwarding, message {} stays unforwarded",
                owner, message_id
            );
            return Ok(false);
        };

        let text = format_new(owner, msg);
        let sent = match staged {
            Some(media) => conn.send_media(self.admin_chat_id, &media.path, &text).await,
            None => conn.send_text(self.admin_chat_id, &text).await,
        };

        if let Err(e) = sent {
            warn!("User {}: forwarding message {} failed: {}", owner, message_id, e);
            return Ok(false);
        }

        if !self.store(move |db| db.mark_forwarded(message_id)).await? {
            debug!("User {}: message {} was marked forwarded concurrently", owner, message_id);
        }
        Ok(true)
    }

    async fn notify_edit(
        &self,
        owner: i64,
        msg: &IncomingMessage,
        source: &dyn ConnectionSource,
    ) -> bool {
        let Some(conn) = self.forward_connection(owner, source).await else {
            return false;
        };

        match conn.send_text(self.admin_chat_id, &format_edited(owner, msg)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "User {}: edit notification for message {} failed: {}",
                    owner, msg.message_id, e
                );
                false
            }
        }
    }

    async fn forward_connection(
        &self,
        owner: i64,
        source: &dyn ConnectionSource,
    ) -> Option<Arc<dyn Connection>> {
        match self.route {
            ForwardRoute::Any => source.sendable_connection().await,
            ForwardRoute::Owner => source.owner_connection(owner).await,
        }
    }

    /// Download through the owner's connection and stage locally. Any
    /// failure just means the message is stored without a media path.
    async fn stage_media(
        &self,
        owner: i64,
        msg: &IncomingMessage,
        source: &dyn ConnectionSource,
    ) -> Option<StagedMedia> {
        let store = self.media.as_ref()?;
        if !msg.media.has_payload() {
            return None;
        }
        let media_ref = msg.media_ref.as_deref()?;
        let conn = source.owner_connection(owner).await?;

        let data = match conn.download_media(media_ref).await {
            Ok(data) => data,
            Err(e) => {
                warn!("User {}: media download for message {} failed: {}", owner, msg.message_id, e);
                return None;
            }
        };

        match store.stage(owner, msg.chat.id, msg.message_id, &data).await {
            Ok(staged) => Some(staged),
            Err(e) => {
                warn!("User {}: staging media for message {} failed: {}", owner, msg.message_id, e);
                None
            }
        }
    }

    /// Run a store operation off the async runtime.
    async fn store<F, T>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&Database) -> courier_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let out = tokio::task::spawn_blocking(move || f(&db)).await??;
        Ok(out)
    }
}

fn chat_record(msg: &IncomingMessage) -> ChatRecord {
    ChatRecord {
        remote_id: msg.chat.id,
        kind: msg.chat.kind,
        title: msg.chat.title.clone(),
        username: msg.chat.username.clone(),
        participant_count: msg.chat.participant_count,
        monitored: true,
        last_message_at: Some(msg.edit_date.unwrap_or(msg.date)),
    }
}

fn message_record(
    owner: i64,
    msg: &IncomingMessage,
    edited_at: Option<DateTime<Utc>>,
    staged: Option<&StagedMedia>,
) -> MessageRecord {
    MessageRecord {
        owner_remote_id: owner,
        remote_message_id: msg.message_id,
        chat_id: msg.chat.id,
        sender_id: msg.sender.as_ref().map(|s| s.id),
        sent_at: msg.date,
        edited_at,
        text: msg.text.clone(),
        media: msg.media.clone(),
        media_path: staged.map(|m| m.path.display().to_string()),
        media_sha256: staged.map(|m| m.sha256.clone()),
        forwarded: false,
        forwarded_at: None,
        raw: serde_json::to_value(msg).unwrap_or_default(),
    }
}

fn describe_media(media: &Media) -> Option<String> {
    match media {
        Media::None => None,
        Media::Photo { .. } => Some("photo".into()),
        Media::Document {
            file_name,
            mime_type,
            ..
        } => Some(match (file_name, mime_type) {
            (Some(name), _) => format!("document {}", name),
            (None, Some(mime)) => format!("document ({})", mime),
            (None, None) => "document".into(),
        }),
        Media::Geo { lat, long } => Some(format!("location {:.5}, {:.5}", lat, long)),
        Media::Contact {
            first_name,
            last_name,
            ..
        } => {
            let name = [first_name.as_deref(), last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            Some(if name.is_empty() {
                "contact".into()
            } else {
                format!("contact {}", name)
            })
        }
    }
}

fn header(title: &str, owner: i64, msg: &IncomingMessage) -> String {
    let chat = msg
        .chat
        .title
        .clone()
        .or_else(|| msg.chat.username.as_ref().map(|u| format!("@{}", u)))
        .unwrap_or_else(|| msg.chat.id.to_string());
    let sender = msg
        .sender
        .as_ref()
        .map(|s| format!("{} ({})", s.display_name(), s.id))
        .unwrap_or_else(|| "unknown".into());

    let mut out = String::new();
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "Account: {}", owner);
    let _ = writeln!(out, "Chat: {} [{}]", chat, msg.chat.kind);
    let _ = writeln!(out, "From: {}", sender);
    out
}

fn format_new(owner: i64, msg: &IncomingMessage) -> String {
    let mut out = header("New message", owner, msg);
    let _ = writeln!(out, "Sent: {}", msg.date.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(media) = describe_media(&msg.media) {
        let _ = writeln!(out, "Media: {}", media);
    }
    if let Some(text) = msg.text.as_deref().filter(|t| !t.is_empty()) {
        let _ = write!(out, "\n{}", text);
    }
    out
}

/// Edits never re-send media, only the new text.
fn format_edited(owner: i64, msg: &IncomingMessage) -> String {
    let mut out = header("Message edited", owner, msg);
    let edited = msg.edit_date.unwrap_or(msg.date);
    let _ = writeln!(out, "Edited: {}", edited.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = write!(out, "\n{}", msg.text.as_deref().unwrap_or("(no text)"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use courier_types::events::{ChatInfo, SenderInfo};
    use courier_types::models::{ChatKind, Profile, UserSettings};

    use crate::mock::{MockConnection, Sent};

    const OWNER: i64 = 1001;
    const ADMIN: i64 = 9000;

    #[derive(Default)]
    struct FakeSource {
        any: Option<Arc<MockConnection>>,
        owner: Option<Arc<MockConnection>>,
    }

    #[async_trait]
    impl ConnectionSource for FakeSource {
        async fn sendable_connection(&self) -> Option<Arc<dyn Connection>> {
            self.any.clone().map(|c| c as Arc<dyn Connection>)
        }

        async fn owner_connection(&self, _owner: i64) -> Option<Arc<dyn Connection>> {
            self.owner.clone().map(|c| c as Arc<dyn Connection>)
        }
    }

    fn single(conn: &Arc<MockConnection>) -> FakeSource {
        FakeSource {
            any: Some(conn.clone()),
            owner: Some(conn.clone()),
        }
    }

    fn setup(settings: UserSettings) -> (Arc<Database>, MessagePipeline) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_user(OWNER, "+70000000001", "sealed", &Profile::default())
            .unwrap();
        db.update_settings(OWNER, &settings).unwrap();
        let pipeline = MessagePipeline::new(db.clone(), ADMIN);
        (db, pipeline)
    }

    fn message(id: i64, chat: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            message_id: id,
            chat: ChatInfo {
                id: chat,
                kind: ChatKind::Group,
                title: Some("Ops".into()),
                username: None,
                participant_count: 4,
            },
            sender: Some(SenderInfo {
                id: 77,
                first_name: Some("Ada".into()),
                last_name: None,
                username: None,
            }),
            date: Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap(),
            edit_date: None,
            text: Some(text.into()),
            media: Media::None,
            media_ref: None,
        }
    }

    fn urgent_only() -> UserSettings {
        UserSettings {
            keywords: vec!["urgent".into()],
            ..Default::default()
        }
    }

    fn message_rows(db: &Database) -> i64 {
        db.with_conn("count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        })
        .unwrap()
    }

    #[tokio::test]
    async fn keyword_match_is_persisted_and_forwarded() {
        let (db, pipeline) = setup(urgent_only());
        let conn = MockConnection::new();
        let source = single(&conn);

        let outcome = pipeline
            .on_new_message(OWNER, message(1, 5, "this is Urgent now"), &source)
            .await
            .unwrap();

        let Outcome::Persisted { message_id, forwarded } = outcome else {
            panic!("expected persisted, got {:?}", outcome);
        };
        assert!(forwarded);
        assert!(message_id > 0);

        let stored = db.get_message(5, 1).unwrap().unwrap();
        assert!(stored.forwarded);
        assert!(stored.forwarded_at.is_some());

        let sent = conn.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Text { recipient: ADMIN, .. }));
        assert!(sent[0].body().contains("this is Urgent now"));
        assert!(sent[0].body().contains("Ada (77)"));
    }

    #[tokio::test]
    async fn unmatched_message_is_dropped() {
        let (db, pipeline) = setup(urgent_only());
        let conn = MockConnection::new();

        let outcome = pipeline
            .on_new_message(OWNER, message(2, 5, "hello"), &single(&conn))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::FilteredOut);
        assert_eq!(message_rows(&db), 0);
        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn edit_updates_row_in_place() {
        let (db, pipeline) = setup(urgent_only());
        let conn = MockConnection::new();
        let source = single(&conn);

        pipeline
            .on_new_message(OWNER, message(1, 5, "this is Urgent now"), &source)
            .await
            .unwrap();

        let edited_at = Utc.with_ymd_and_hms(2026, 6, 1, 8, 3, 0).unwrap();
        // Edits bypass the keyword filter.
        let edit = IncomingMessage {
            edit_date: Some(edited_at),
            ..message(1, 5, "never mind")
        };
        let outcome = pipeline.on_message_edited(OWNER, edit, &source).await.unwrap();
        assert!(matches!(outcome, Outcome::Persisted { forwarded: true, .. }));

        assert_eq!(message_rows(&db), 1);
        let stored = db.get_message(5, 1).unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("never mind"));
        assert_eq!(stored.edited_at, Some(edited_at));
        assert!(stored.forwarded);

        let sent = conn.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].body().starts_with("Message edited"));
        assert!(sent[1].body().contains("never mind"));
    }

    #[tokio::test]
    async fn edit_notification_respects_flag() {
        let (db, pipeline) = setup(UserSettings {
            forward_edited: false,
            ..Default::default()
        });
        let conn = MockConnection::new();
        let source = single(&conn);

        pipeline.on_new_message(OWNER, message(1, 5, "a"), &source).await.unwrap();
        let outcome = pipeline
            .on_message_edited(OWNER, message(1, 5, "b"), &source)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Persisted { forwarded: false, .. }));
        assert_eq!(db.get_message(5, 1).unwrap().unwrap().text.as_deref(), Some("b"));
        assert_eq!(conn.sent().len(), 1);
    }

    #[tokio::test]
    async fn redelivered_message_is_forwarded_once() {
        let (db, pipeline) = setup(UserSettings::default());
        let conn = MockConnection::new();
        let source = single(&conn);

        let first = pipeline
            .on_new_message(OWNER, message(42, 7, "hi"), &source)
            .await
            .unwrap();
        let second = pipeline
            .on_new_message(OWNER, message(42, 7, "hi"), &source)
            .await
            .unwrap();

        let Outcome::Persisted { message_id, forwarded: true } = first else {
            panic!("expected forwarded, got {:?}", first);
        };
        assert_eq!(second, Outcome::Persisted { message_id, forwarded: false });
        assert_eq!(conn.sent().len(), 1);
        assert_eq!(message_rows(&db), 1);
        assert!(db.get_message(7, 42).unwrap().unwrap().forwarded);
    }

    #[tokio::test]
    async fn redelivery_after_failed_forward_retries_delivery() {
        let (db, pipeline) = setup(UserSettings::default());
        let conn = MockConnection::new();
        let source = single(&conn);

        conn.fail_sends(true);
        pipeline.on_new_message(OWNER, message(42, 7, "hi"), &source).await.unwrap();
        conn.fail_sends(false);
        let outcome = pipeline
            .on_new_message(OWNER, message(42, 7, "hi"), &source)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Persisted { forwarded: true, .. }));
        assert_eq!(conn.sent().len(), 1);
        assert!(db.get_message(7, 42).unwrap().unwrap().forwarded);
    }

    #[tokio::test]
    async fn edit_without_edit_date_is_stamped() {
        let (db, pipeline) = setup(UserSettings::default());
        let conn = MockConnection::new();
        let source = single(&conn);

        pipeline.on_new_message(OWNER, message(1, 5, "a"), &source).await.unwrap();
        assert!(db.get_message(5, 1).unwrap().unwrap().edited_at.is_none());

        let before = Utc::now() - chrono::Duration::seconds(1);
        pipeline
            .on_message_edited(OWNER, message(1, 5, "b"), &source)
            .await
            .unwrap();

        let stored = db.get_message(5, 1).unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("b"));
        let edited_at = stored.edited_at.expect("edit timestamp set");
        assert!(edited_at >= before);
    }

    #[tokio::test]
    async fn deactivated_owner_keeps_nothing() {
        let (db, pipeline) = setup(UserSettings {
            excluded_chats: [5].into_iter().collect(),
            ..Default::default()
        });
        db.with_conn("deactivate", |conn| {
            conn.execute("UPDATE users SET is_active = 0 WHERE remote_id = ?1", [OWNER])
        })
        .unwrap();
        let conn = MockConnection::new();

        let outcome = pipeline
            .on_new_message(OWNER, message(1, 5, "secret"), &single(&conn))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Inactive);
        assert_eq!(message_rows(&db), 0);
        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn excluded_chat_is_never_persisted() {
        let (db, pipeline) = setup(UserSettings {
            keywords: vec!["urgent".into()],
            excluded_chats: [5].into_iter().collect(),
            ..Default::default()
        });
        let conn = MockConnection::new();
        let source = single(&conn);

        let new = pipeline
            .on_new_message(OWNER, message(1, 5, "urgent"), &source)
            .await
            .unwrap();
        let edit = pipeline
            .on_message_edited(OWNER, message(1, 5, "urgent!"), &source)
            .await
            .unwrap();

        assert_eq!(new, Outcome::Excluded);
        assert_eq!(edit, Outcome::Excluded);
        assert_eq!(message_rows(&db), 0);
        assert!(db.get_chat(5).unwrap().is_none());
        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_forward_keeps_the_record() {
        let (db, pipeline) = setup(UserSettings::default());
        let conn = MockConnection::new();
        conn.fail_sends(true);

        let outcome = pipeline
            .on_new_message(OWNER, message(3, 5, "hi"), &single(&conn))
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Persisted { forwarded: false, .. }));
        let stored = db.get_message(5, 3).unwrap().unwrap();
        assert!(!stored.forwarded);
    }

    #[tokio::test]
    async fn no_live_connection_means_unforwarded() {
        let (db, pipeline) = setup(UserSettings::default());

        let outcome = pipeline
            .on_new_message(OWNER, message(3, 5, "hi"), &FakeSource::default())
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Persisted { forwarded: false, .. }));
        assert_eq!(message_rows(&db), 1);
    }

    #[tokio::test]
    async fn owner_route_skips_foreign_connections() {
        let (db, pipeline) = setup(UserSettings::default());
        let pipeline = pipeline.with_route(ForwardRoute::Owner);
        let other = MockConnection::new();
        let source = FakeSource {
            any: Some(other.clone()),
            owner: None,
        };

        let outcome = pipeline
            .on_new_message(OWNER, message(4, 5, "hi"), &source)
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Persisted { forwarded: false, .. }));
        assert!(other.sent().is_empty());
        assert!(!db.get_message(5, 4).unwrap().unwrap().forwarded);
    }

    #[tokio::test]
    async fn deletions_flag_known_rows_only() {
        let (db, pipeline) = setup(UserSettings::default());
        let conn = MockConnection::new();
        pipeline
            .on_new_message(OWNER, message(1, 5, "x"), &single(&conn))
            .await
            .unwrap();

        let outcome = pipeline
            .dispatch(
                OWNER,
                TransportEvent::MessagesDeleted {
                    chat_id: 5,
                    message_ids: vec![1, 404],
                },
                &single(&conn),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deleted { matched: 1 });
        assert!(db.get_message(5, 1).unwrap().unwrap().deleted);
        assert!(db.get_message(5, 404).unwrap().is_none());
        assert_eq!(conn.sent().len(), 1);
    }

    #[tokio::test]
    async fn media_is_staged_and_sent_as_media() {
        let dir = std::env::temp_dir().join(format!("courier-pipeline-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(MediaStore::new(dir.clone()).await.unwrap());
        let (db, pipeline) = setup(UserSettings::default());
        let pipeline = pipeline.with_media(store);
        let conn = MockConnection::new();

        let msg = IncomingMessage {
            media: Media::Photo {
                photo_id: Some(10),
                size: 16,
            },
            media_ref: Some("photo-10".into()),
            ..message(8, 5, "look")
        };
        pipeline.on_new_message(OWNER, msg, &single(&conn)).await.unwrap();

        let stored = db.get_message(5, 8).unwrap().unwrap();
        assert_eq!(stored.media_type.as_deref(), Some("photo"));
        let path = dir.join(OWNER.to_string()).join("5_8");
        assert_eq!(stored.media_path, Some(path.display().to_string()));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"payload:photo-10");

        let sent = conn.sent();
        assert!(matches!(&sent[0], Sent::Media { path: p, .. } if *p == path));
        assert!(sent[0].body().contains("Media: photo"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn media_off_sends_text_only() {
        let dir = std::env::temp_dir().join(format!("courier-pipeline-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(MediaStore::new(dir.clone()).await.unwrap());
        let (db, pipeline) = setup(UserSettings {
            forward_media: false,
            ..Default::default()
        });
        let pipeline = pipeline.with_media(store);
        let conn = MockConnection::new();

        let msg = IncomingMessage {
            media: Media::Document {
                mime_type: Some("application/pdf".into()),
                size: 3,
                file_name: Some("q3.pdf".into()),
            },
            media_ref: Some("doc-1".into()),
            ..message(9, 5, "")
        };
        pipeline.on_new_message(OWNER, msg, &single(&conn)).await.unwrap();

        let stored = db.get_message(5, 9).unwrap().unwrap();
        assert_eq!(stored.media_type.as_deref(), Some("document"));
        assert!(stored.media_path.is_none());
        let sent = conn.sent();
        assert!(matches!(&sent[0], Sent::Text { .. }));
        assert!(sent[0].body().contains("document q3.pdf"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn forward_route_parses() {
        assert_eq!("any".parse::<ForwardRoute>().unwrap(), ForwardRoute::Any);
        assert_eq!(" Owner ".parse::<ForwardRoute>().unwrap(), ForwardRoute::Owner);
        assert!("nearest".parse::<ForwardRoute>().is_err());
    }
}
