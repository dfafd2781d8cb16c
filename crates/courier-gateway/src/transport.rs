use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use courier_types::events::TransportEvent;

use crate::error::TransportError;

/// Inbound events for one session, in arrival order. A reconnect keeps
/// feeding the same stream.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens authenticated connections to the remote messaging service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        credential: &str,
    ) -> Result<(Arc<dyn Connection>, EventStream), TransportError>;
}

/// One live, authenticated link for one user.
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Re-establish the link with the credential it was opened with.
    async fn reconnect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self);

    async fn send_text(&self, recipient: i64, text: &str) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        recipient: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Resolve an opaque media reference from an event into its bytes.
    async fn download_media(&self, media_ref: &str) -> Result<Bytes, TransportError>;
}
