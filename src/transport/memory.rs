//! In-process transport, fed by the embedding program. Used by the tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MessageTransport, OutgoingMessage, TransportError};
use crate::dispatcher::InboundMessage;

#[derive(Debug, Default)]
struct Mailbox {
    inbox: Vec<(InboundMessage, bool)>,
    outbox: Vec<OutgoingMessage>,
    disconnected: bool,
}

/// Clones share the same mailbox.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    mailbox: Arc<Mutex<Mailbox>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message. Returns its id.
    pub fn deliver(&self, message: InboundMessage) -> String {
        let id = message.id.clone();
        self.mailbox.lock().inbox.push((message, false));
        id
    }

    pub fn unread_count(&self) -> usize {
        self.mailbox
            .lock()
            .inbox
            .iter()
            .filter(|(_, read)| !read)
            .count()
    }

    /// Replies sent so far.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.mailbox.lock().outbox.clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.mailbox.lock().disconnected
    }

    fn ensure_connected(mailbox: &Mailbox) -> Result<(), TransportError> {
        if mailbox.disconnected {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, TransportError> {
        let mailbox = self.mailbox.lock();
        Self::ensure_connected(&mailbox)?;
        Ok(mailbox
            .inbox
            .iter()
            .filter(|(_, read)| !read)
            .take(limit)
            .map(|(msg, _)| msg.clone())
            .collect())
    }

    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let mut mailbox = self.mailbox.lock();
        Self::ensure_connected(&mailbox)?;
        log::debug!("Reply queued for {}: {}", to, subject);
        mailbox.outbox.push(OutgoingMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn mark_read(&self, id: &str) -> Result<(), TransportError> {
        let mut mailbox = self.mailbox.lock();
        Self::ensure_connected(&mailbox)?;
        let entry = mailbox
            .inbox
            .iter_mut()
            .find(|(msg, _)| msg.id == id)
            .ok_or_else(|| TransportError::NotFound(id.to_string()))?;
        entry.1 = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.mailbox.lock().disconnected = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_respects_limit_and_read_flags() {
        let transport = MemoryTransport::new();
        let first = transport.deliver(InboundMessage::new("a@home", "one", "ping"));
        transport.deliver(InboundMessage::new("b@home", "two", "ping"));
        transport.deliver(InboundMessage::new("c@home", "three", "ping"));

        let batch = transport.fetch_unread(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].subject, "one");

        transport.mark_read(&first).await.unwrap();
        let batch = transport.fetch_unread(5).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].subject, "two");
        assert_eq!(transport.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_mark_unknown_message() {
        let transport = MemoryTransport::new();
        assert!(matches!(
            transport.mark_read("nope").await,
            Err(TransportError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_stops_traffic() {
        let transport = MemoryTransport::new();
        let handle = transport.clone();
        transport.send_reply("a@home", "Re: x", "body").await.unwrap();
        transport.disconnect().await.unwrap();

        assert!(!handle.is_connected());
        assert_eq!(handle.sent().len(), 1);
        assert!(matches!(
            transport.fetch_unread(1).await,
            Err(TransportError::Disconnected)
        ));
    }
}
