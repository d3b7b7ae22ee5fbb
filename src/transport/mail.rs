//! IMAP/SMTP mail transport.
//!
//! Unread mail is read over IMAP (implicit TLS) and replies go out over SMTP
//! with STARTTLS. Messages are addressed by IMAP UID. The IMAP session is
//! opened on first use and dropped after any IMAP error, so the next poll
//! reconnects.

use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use futures::TryStreamExt;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailparse::{MailHeaderMap, ParsedMail};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{MessageTransport, TransportError};
use crate::config::MailSettings;
use crate::dispatcher::InboundMessage;
use crate::utilities::logger::Logger;

type ImapSession = Session<TlsStream<TcpStream>>;

pub struct MailTransport {
    settings: MailSettings,
    session: Mutex<Option<ImapSession>>,
    logger: Logger,
}

impl MailTransport {
    /// Validate settings. No connection is made until the first poll.
    pub fn new(settings: MailSettings, logger: Logger) -> Result<Self, TransportError> {
        let required = [
            ("imap_server", &settings.imap_server),
            ("smtp_server", &settings.smtp_server),
            ("username", &settings.username),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(TransportError::Connection(format!(
                "mail transport is missing settings: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            settings,
            session: Mutex::new(None),
            logger,
        })
    }

    pub fn settings(&self) -> &MailSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<ImapSession, TransportError> {
        let s = &self.settings;
        self.logger
            .info(format!("Connecting to IMAP server: {}", s.imap_server));

        let tcp = TcpStream::connect((s.imap_server.as_str(), s.imap_port))
            .await
            .map_err(|e| {
                TransportError::Connection(format!("{}:{}: {}", s.imap_server, s.imap_port, e))
            })?;
        let tls = async_native_tls::TlsConnector::new()
            .connect(s.imap_server.as_str(), tcp)
            .await
            .map_err(|e| TransportError::Connection(format!("TLS handshake failed: {}", e)))?;

        let client = async_imap::Client::new(tls);
        let mut session = client
            .login(&s.username, &s.password)
            .await
            .map_err(|(e, _)| TransportError::Connection(format!("IMAP login failed: {}", e)))?;
        session.select(&s.mailbox).await.map_err(imap_error)?;

        self.logger.info("IMAP connection established");
        Ok(session)
    }

    async fn ensure_session<'a>(
        &self,
        slot: &'a mut Option<ImapSession>,
    ) -> Result<&'a mut ImapSession, TransportError> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        slot.as_mut().ok_or(TransportError::Disconnected)
    }

    async fn fetch_raw(
        session: &mut ImapSession,
        mailbox: &str,
        limit: usize,
    ) -> Result<Vec<(u32, Vec<u8>)>, async_imap::error::Error> {
        session.select(mailbox).await?;
        let mut uids: Vec<u32> = session.uid_search("UNSEEN").await?.into_iter().collect();
        let uids = newest(&mut uids, limit);
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fetches: Vec<_> = session
            .uid_fetch(&set, "(UID BODY.PEEK[])")
            .await?
            .try_collect()
            .await?;

        let mut raw: Vec<(u32, Vec<u8>)> = fetches
            .iter()
            .filter_map(|fetch| Some((fetch.uid?, fetch.body()?.to_vec())))
            .collect();
        raw.sort_by_key(|(uid, _)| *uid);
        Ok(raw)
    }
}

impl std::fmt::Debug for MailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailTransport")
            .field("imap_server", &self.settings.imap_server)
            .field("smtp_server", &self.settings.smtp_server)
            .field("username", &self.settings.username)
            .finish()
    }
}

#[async_trait]
impl MessageTransport for MailTransport {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, TransportError> {
        let mut slot = self.session.lock().await;
        let session = self.ensure_session(&mut slot).await?;

        let raw = match Self::fetch_raw(session, &self.settings.mailbox, limit).await {
            Ok(raw) => raw,
            Err(e) => {
                *slot = None;
                return Err(imap_error(e));
            }
        };

        let mut messages = Vec::with_capacity(raw.len());
        for (uid, bytes) in raw {
            match parse_message(uid, &bytes) {
                Ok(message) => messages.push(message),
                Err(e) => self
                    .logger
                    .error(format!("Error processing message {}: {}", uid, e)),
            }
        }
        self.logger
            .info(format!("Fetched {} unread message(s)", messages.len()));
        Ok(messages)
    }

    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let email = build_reply(&self.settings.username, to, subject, body)?;
        let s = &self.settings;
        self.logger.debug(format!(
            "Connecting to SMTP server: {}:{}",
            s.smtp_server, s.smtp_port
        ));

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&s.smtp_server)
            .map_err(|e| TransportError::Send(e.to_string()))?
            .port(s.smtp_port)
            .credentials(Credentials::new(s.username.clone(), s.password.clone()))
            .build();
        mailer
            .send(email)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        self.logger
            .info(format!("Email sent to {}: {}", to, subject));
        Ok(())
    }

    async fn mark_read(&self, id: &str) -> Result<(), TransportError> {
        let uid: u32 = id
            .parse()
            .map_err(|_| TransportError::NotFound(id.to_string()))?;

        let mut slot = self.session.lock().await;
        let session = self.ensure_session(&mut slot).await?;
        let stored: Result<Vec<_>, _> =
            match session.uid_store(uid.to_string(), "+FLAGS (\\Seen)").await {
                Ok(updates) => updates.try_collect().await,
                Err(e) => Err(e),
            };
        if let Err(e) = stored {
            *slot = None;
            return Err(imap_error(e));
        }

        self.logger.debug(format!("Marked message {} as read", uid));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(mut session) = self.session.lock().await.take() {
            session.logout().await.map_err(imap_error)?;
            self.logger.info("IMAP connection closed");
        }
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        let mut slot = self.session.lock().await;
        let healthy = match self.ensure_session(&mut slot).await {
            Ok(session) => session.noop().await.is_ok(),
            Err(e) => {
                self.logger.error(format!("Connection test failed: {}", e));
                return false;
            }
        };
        if !healthy {
            *slot = None;
        }
        healthy
    }
}

fn imap_error(e: async_imap::error::Error) -> TransportError {
    TransportError::Connection(format!("IMAP error: {}", e))
}

/// Keep the `limit` highest UIDs, ascending.
fn newest(uids: &mut Vec<u32>, limit: usize) -> &[u32] {
    uids.sort_unstable();
    let skip = uids.len().saturating_sub(limit);
    &uids[skip..]
}

/// Turn a raw RFC 822 message into an [`InboundMessage`] with id `uid`.
///
/// The sender is the bare address of `From`. The body is the first
/// `text/plain` part, or the whole payload of a single-part message.
pub fn parse_message(uid: u32, raw: &[u8]) -> Result<InboundMessage, TransportError> {
    let mail = mailparse::parse_mail(raw).map_err(|e| TransportError::Malformed(e.to_string()))?;
    let headers = mail.get_headers();

    let from = headers.get_first_value("From").unwrap_or_default();
    let sender = mailparse::addrparse(&from)
        .ok()
        .and_then(|list| list.extract_single_info())
        .map(|info| info.addr)
        .unwrap_or_else(|| from.trim().to_string());
    if sender.is_empty() {
        return Err(TransportError::Malformed(format!(
            "message {} has no sender",
            uid
        )));
    }

    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let body = if mail.subparts.is_empty() {
        mail.get_body().unwrap_or_default()
    } else {
        first_plain_part(&mail).unwrap_or_default()
    };

    Ok(InboundMessage::new(sender, subject, body.trim()).with_id(uid.to_string()))
}

fn first_plain_part(part: &ParsedMail<'_>) -> Option<String> {
    if part.subparts.is_empty() {
        return part
            .ctype
            .mimetype
            .eq_ignore_ascii_case("text/plain")
            .then(|| part.get_body().ok())
            .flatten();
    }
    part.subparts.iter().find_map(first_plain_part)
}

/// Plain-text reply from `from` to `to`.
pub fn build_reply(from: &str, to: &str, subject: &str, body: &str) -> Result<Message, TransportError> {
    let sender: Mailbox = from
        .parse()
        .map_err(|e| TransportError::Send(format!("invalid sender address '{}': {}", from, e)))?;
    let recipient: Mailbox = to
        .parse()
        .map_err(|e| TransportError::Send(format!("invalid recipient address '{}': {}", to, e)))?;

    Message::builder()
        .from(sender)
        .to(recipient)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| TransportError::Send(e.to_string()))
}
