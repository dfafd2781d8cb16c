//! Transport that talks JSON over a WebSocket to an external protocol
//! bridge process. The bridge owns the actual client library; this side
//! only logs in with the stored credential, receives events and issues
//! send/download requests.
//!
//! Wire format, one JSON object per text frame:
//!
//!   -> {"op":"login","id":"<uuid>","credential":"..."}
//!   -> {"op":"send_text","id":"<uuid>","recipient":1,"text":"..."}
//!   -> {"op":"send_media","id":"<uuid>","recipient":1,"path":"...","caption":"..."}
//!   -> {"op":"download_media","id":"<uuid>","media_ref":"..."}
//!   <- {"type":"reply","id":"<uuid>","ok":true,"data":"<base64, downloads only>"}
//!   <- {"type":"reply","id":"<uuid>","ok":false,"error":"...","auth_failed":true}
//!   <- {"type":"event","event":{"type":"new_message","data":{...}}}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use courier_types::events::TransportEvent;

use crate::error::TransportError;
use crate::transport::{Connection, EventStream, Transport};

/// Ping every 15 seconds; two missed pongs drop the link.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Login {
        id: Uuid,
        credential: &'a str,
    },
    SendText {
        id: Uuid,
        recipient: i64,
        text: &'a str,
    },
    SendMedia {
        id: Uuid,
        recipient: i64,
        path: &'a str,
        caption: &'a str,
    },
    DownloadMedia {
        id: Uuid,
        media_ref: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: Uuid,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    auth_failed: bool,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Reply(Reply),
    Event { event: TransportEvent },
}

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Reply>>>>;

/// Dials the bridge once per session.
pub struct BridgeTransport {
    url: String,
    request_timeout: Duration,
}

impl BridgeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(
        &self,
        credential: &str,
    ) -> Result<(Arc<dyn Connection>, EventStream), TransportError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(BridgeConnection {
            url: self.url.clone(),
            credential: credential.to_string(),
            request_timeout: self.request_timeout,
            events: events_tx,
            link: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        });

        conn.dial().await?;
        let conn: Arc<dyn Connection> = conn;
        Ok((conn, events_rx))
    }
}

/// The socket half owned by the connection: frames queued on `outbound`
/// are written by the link task.
struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

pub struct BridgeConnection {
    url: String,
    credential: String,
    request_timeout: Duration,
    /// Shared by every link this connection ever dials, so the session's
    /// event stream survives reconnects.
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Mutex<Option<Link>>,
    connected: Arc<AtomicBool>,
    pending: Pending,
}

impl BridgeConnection {
    /// Open the socket, start the link task and log in.
    async fn dial(&self) -> Result<(), TransportError> {
        let (ws, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            warn!("Bridge dial to {} failed: {}", self.url, e);
            TransportError::Disconnected
        })?;
        let (sink, stream) = ws.split();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            sink,
            stream,
            outbound_rx,
            self.events.clone(),
            self.pending.clone(),
            self.connected.clone(),
        ));

        if let Some(old) = self.link.lock().await.replace(Link {
            outbound: outbound_tx,
            task,
        }) {
            old.task.abort();
        }

        let id = Uuid::new_v4();
        let reply = self
            .call(
                id,
                &Request::Login {
                    id,
                    credential: &self.credential,
                },
            )
            .await?;

        if !reply.ok {
            self.close_link().await;
            let reason = reply.error.unwrap_or_else(|| "login refused".into());
            return Err(if reply.auth_failed {
                TransportError::Auth(reason)
            } else {
                TransportError::Protocol(reason)
            });
        }

        self.connected.store(true, Ordering::Release);
        info!("Bridge session established at {}", self.url);
        Ok(())
    }

    /// Send one request and wait for the reply with the same id.
    async fn call(&self, id: Uuid, request: &Request<'_>) -> Result<Reply, TransportError> {
        let frame = serde_json::to_string(request)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let queued = self
            .link
            .lock()
            .await
            .as_ref()
            .is_some_and(|link| link.outbound.send(Message::Text(frame.into())).is_ok());
        if !queued {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Disconnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Link task exited and dropped the sender.
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Send(format!(
                    "bridge did not answer within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn expect_ok(&self, id: Uuid, request: &Request<'_>) -> Result<Reply, TransportError> {
        let reply = self.call(id, request).await?;
        if reply.ok {
            Ok(reply)
        } else {
            Err(TransportError::Send(
                reply.error.unwrap_or_else(|| "request refused".into()),
            ))
        }
    }

    async fn close_link(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(link) = self.link.lock().await.take() {
            let _ = link.outbound.send(Message::Close(None));
            // Give the writer a moment to flush the close frame.
            let mut task = link.task;
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Connection for BridgeConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.close_link().await;
        self.dial().await
    }

    async fn disconnect(&self) {
        self.close_link().await;
        debug!("Bridge session at {} closed", self.url);
    }

    async fn send_text(&self, recipient: i64, text: &str) -> Result<(), TransportError> {
        let id = Uuid::new_v4();
        self.expect_ok(
            id,
            &Request::SendText {
                id,
                recipient,
                text,
            },
        )
        .await?;
        Ok(())
    }

    async fn send_media(
        &self,
        recipient: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        let path = path.to_string_lossy();
        let id = Uuid::new_v4();
        self.expect_ok(
            id,
            &Request::SendMedia {
                id,
                recipient,
                path: &path,
                caption,
            },
        )
        .await?;
        Ok(())
    }

    async fn download_media(&self, media_ref: &str) -> Result<Bytes, TransportError> {
        let id = Uuid::new_v4();
        let reply = self
            .expect_ok(id, &Request::DownloadMedia { id, media_ref })
            .await?;

        let data = reply
            .data
            .ok_or_else(|| TransportError::Protocol("download reply without data".into()))?;
        B64.decode(data)
            .map(Bytes::from)
            .map_err(|e| TransportError::Protocol(format!("bad media encoding: {}", e)))
    }
}

/// Socket loop: writes queued frames, routes replies to their waiting
/// callers and events to the session stream, and keeps the link alive with
/// pings. Marks the connection down and fails outstanding requests on exit.
async fn run_link<S, R>(
    mut sink: S,
    mut stream: R,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
    pending: Pending,
    connected: Arc<AtomicBool>,
) where
    S: futures_util::Sink<Message> + Unpin,
    R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_pongs: u8 = 0;
    let mut pong_received = true;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let closing = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() || closing {
                    break;
                }
            }
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("Bridge socket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => match serde_json::from_str::<Inbound>(text.as_str()) {
                        Ok(Inbound::Reply(reply)) => {
                            if let Some(waiter) = pending.lock().await.remove(&reply.id) {
                                let _ = waiter.send(reply);
                            } else {
                                trace!("Reply {} arrived after its caller gave up", reply.id);
                            }
                        }
                        Ok(Inbound::Event { event }) => {
                            if events.send(event).is_err() {
                                debug!("Event consumer gone, dropping bridge event");
                            }
                        }
                        Err(e) => {
                            let raw: String = text.as_str().chars().take(200).collect();
                            warn!("Unreadable bridge frame: {} -- raw: {}", e, raw);
                        }
                    },
                    Message::Pong(_) => pong_received = true,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_pongs = 0;
                } else {
                    missed_pongs += 1;
                    if missed_pongs >= 2 {
                        warn!("Bridge heartbeat timeout (missed {} pongs)", missed_pongs);
                        break;
                    }
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::Release);
    // Dropping the senders wakes every waiting caller with an error.
    pending.lock().await.clear();
    debug!("Bridge link closed");
}
