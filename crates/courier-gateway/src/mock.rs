//! In-memory transport for tests: records every send and lets a test flip
//! connectivity or inject events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use courier_types::events::TransportEvent;

use crate::error::TransportError;
use crate::transport::{Connection, EventStream, Transport};

/// Credential the mock transport refuses to authenticate.
pub const REJECTED_CREDENTIAL: &str = "rejected-credential";

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        recipient: i64,
        text: String,
    },
    Media {
        recipient: i64,
        path: PathBuf,
        caption: String,
    },
}

impl Sent {
    pub fn body(&self) -> &str {
        match self {
            Self::Text { text, .. } => text,
            Self::Media { caption, .. } => caption,
        }
    }
}

pub struct MockConnection {
    connected: AtomicBool,
    fail_sends: AtomicBool,
    fail_reconnect: AtomicBool,
    pub reconnects: AtomicUsize,
    pub disconnects: AtomicUsize,
    sent: Mutex<Vec<Sent>>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            fail_reconnect: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn check_send(&self) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("mock send failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
    }

    async fn send_text(&self, recipient: i64, text: &str) -> Result<(), TransportError> {
        self.check_send()?;
        self.sent.lock().unwrap().push(Sent::Text {
            recipient,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(
        &self,
        recipient: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.check_send()?;
        self.sent.lock().unwrap().push(Sent::Media {
            recipient,
            path: path.to_path_buf(),
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn download_media(&self, media_ref: &str) -> Result<Bytes, TransportError> {
        Ok(Bytes::from(format!("payload:{}", media_ref)))
    }
}

type Opened = (Arc<MockConnection>, mpsc::UnboundedSender<TransportEvent>);

/// Hands out one `MockConnection` per successful connect, keyed by the
/// credential it was opened with.
#[derive(Default)]
pub struct MockTransport {
    pub connects: AtomicUsize,
    connect_delay: Option<Duration>,
    opened: Mutex<HashMap<String, Opened>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Slow connects widen the window for racing `start` calls.
    pub fn with_connect_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connect_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn connection(&self, credential: &str) -> Option<Arc<MockConnection>> {
        self.opened
            .lock()
            .unwrap()
            .get(credential)
            .map(|(conn, _)| conn.clone())
    }

    pub fn push(&self, credential: &str, event: TransportEvent) -> bool {
        self.opened
            .lock()
            .unwrap()
            .get(credential)
            .is_some_and(|(_, tx)| tx.send(event).is_ok())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        credential: &str,
    ) -> Result<(Arc<dyn Connection>, EventStream), TransportError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        if credential == REJECTED_CREDENTIAL {
            return Err(TransportError::Auth("credential revoked".into()));
        }

        let conn = MockConnection::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.opened
            .lock()
            .unwrap()
            .insert(credential.to_string(), (conn.clone(), tx));

        let conn: Arc<dyn Connection> = conn;
        Ok((conn, rx))
    }
}
