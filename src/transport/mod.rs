//! Message transports: where requests come from and where replies go.

pub mod mail;
pub mod memory;
pub mod reply;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{TransportKind, TransportSettings};
use crate::dispatcher::InboundMessage;
use crate::utilities::logger::Logger;

pub use mail::MailTransport;
pub use memory::MemoryTransport;
pub use reply::{ComposedReply, ReplyComposer};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport connection failed: {0}")]
    Connection(String),

    #[error("Failed to send reply: {0}")]
    Send(String),

    #[error("Message '{0}' not found")]
    NotFound(String),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Reply template error: {0}")]
    Template(#[from] tera::Error),
}

/// A reply handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Channel that delivers inbound messages and carries replies back.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Up to `limit` unread messages, oldest first.
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, TransportError>;

    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError>;

    async fn mark_read(&self, id: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Whether the channel is reachable right now.
    async fn test_connection(&self) -> bool {
        true
    }
}

/// Build the transport selected by `transport.kind`.
pub fn from_settings(
    settings: &TransportSettings,
    logger: Logger,
) -> Result<Arc<dyn MessageTransport>, TransportError> {
    match settings.kind {
        TransportKind::Memory => Ok(Arc::new(MemoryTransport::new())),
        TransportKind::Mail => Ok(Arc::new(MailTransport::new(settings.mail.clone(), logger)?)),
    }
}
