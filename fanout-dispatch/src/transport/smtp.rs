//! SMTP senders built on lettre's pooled async transport
//!
//! Each account gets its own `AsyncSmtpTransport`, whose pool bounds the
//! number of open connections. With `recycle_after_messages` set, the pool is
//! replaced after that many messages; connections of the old pool close as
//! their in-flight sends finish. [`Sender::release`] drops the pool outright,
//! and the next send after a release builds a fresh one.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fanout_common::{
    Account, AttachmentContent, Body, MessageUnit, SecurityMode, internal, outgoing,
};
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        Error as SmtpError,
        PoolConfig,
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{SendError, TransportUnavailable},
    transport::{Sender, TransportFactory},
};

type Transport = AsyncSmtpTransport<Tokio1Executor>;

/// Connection settings shared by every account's sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTransportConfig {
    /// Maximum open connections per account
    ///
    /// Default: 4
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    /// Replace the account's connection pool after this many messages
    #[serde(default)]
    pub recycle_after_messages: Option<u32>,

    /// Close pooled connections idle for longer than this (seconds)
    ///
    /// Default: 60
    #[serde(default = "defaults::idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Timeout for each SMTP command (seconds). A timed out command fails the
    /// attempt, which is then retried.
    ///
    /// Default: 30
    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Open a connection when the sender is built, so an unreachable relay
    /// is reported once as unavailable instead of failing every attempt
    #[serde(default)]
    pub verify_on_connect: bool,

    /// Accept invalid TLS certificates (for testing only)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for SmtpTransportConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::max_connections(),
            recycle_after_messages: None,
            idle_timeout_secs: defaults::idle_timeout_secs(),
            command_timeout_secs: defaults::command_timeout_secs(),
            verify_on_connect: false,
            accept_invalid_certs: false,
        }
    }
}

mod defaults {
    pub const fn max_connections() -> u32 {
        4
    }

    pub const fn idle_timeout_secs() -> u64 {
        60
    }

    pub const fn command_timeout_secs() -> u64 {
        30
    }
}

fn build_transport(account: &Account, config: &SmtpTransportConfig) -> Result<Transport, SmtpError> {
    let builder = match account.security {
        SecurityMode::Implicit => Transport::relay(&account.host)?,
        SecurityMode::StartTls => Transport::starttls_relay(&account.host)?,
        SecurityMode::None => Transport::builder_dangerous(&account.host),
    };

    let mut builder = builder
        .port(account.port)
        .timeout(Some(Duration::from_secs(config.command_timeout_secs)))
        .pool_config(
            PoolConfig::new()
                .max_size(config.max_connections.max(1))
                .idle_timeout(Duration::from_secs(config.idle_timeout_secs)),
        );

    if config.accept_invalid_certs && account.security != SecurityMode::None {
        let parameters = TlsParameters::builder(account.host.clone())
            .dangerous_accept_invalid_certs(true)
            .build()?;
        builder = builder.tls(if account.security == SecurityMode::Implicit {
            Tls::Wrapper(parameters)
        } else {
            Tls::Required(parameters)
        });
    }

    if account.has_credentials() {
        builder = builder.credentials(Credentials::new(
            account.identity.clone(),
            account.secret.clone(),
        ));
    }

    Ok(builder.build())
}

/// Map a lettre error onto the retry taxonomy: 5xx replies are permanent,
/// everything else (4xx, I/O, timeouts, TLS) may succeed later
fn classify(error: &SmtpError) -> SendError {
    if error.is_permanent() {
        SendError::permanent(error.to_string())
    } else {
        SendError::temporary(error.to_string())
    }
}

enum Content {
    Single(SinglePart),
    Multi(MultiPart),
}

impl From<&Body> for Content {
    fn from(body: &Body) -> Self {
        match (&body.plain, &body.rich) {
            (Some(plain), Some(rich)) => {
                Self::Multi(MultiPart::alternative_plain_html(plain.clone(), rich.clone()))
            }
            (None, Some(rich)) => Self::Single(SinglePart::html(rich.clone())),
            (plain, None) => Self::Single(SinglePart::plain(plain.clone().unwrap_or_default())),
        }
    }
}

struct PooledTransport {
    /// `None` once released
    transport: Option<Arc<Transport>>,
    /// Messages sent through the current pool
    sent: u32,
}

/// Sender for one account
pub struct SmtpSender {
    account: Account,
    from: Mailbox,
    config: SmtpTransportConfig,
    pool: parking_lot::Mutex<PooledTransport>,
}

impl SmtpSender {
    /// # Errors
    ///
    /// Fails if the account's identity is not an address or the transport
    /// cannot be configured
    pub fn new(account: Account, config: SmtpTransportConfig) -> Result<Self, TransportUnavailable> {
        let unavailable = |reason: String| TransportUnavailable {
            account: account.identity.clone(),
            reason,
        };

        let address: Address = account
            .identity
            .parse()
            .map_err(|e| unavailable(format!("identity is not an address: {e}")))?;
        let transport = build_transport(&account, &config).map_err(|e| unavailable(e.to_string()))?;

        Ok(Self {
            from: Mailbox::new(account.display_name.clone(), address),
            pool: parking_lot::Mutex::new(PooledTransport {
                transport: Some(Arc::new(transport)),
                sent: 0,
            }),
            account,
            config,
        })
    }

    /// Check the relay answers
    async fn verify(&self) -> Result<(), TransportUnavailable> {
        let reason = match self.transport(false) {
            Ok(transport) => match transport.test_connection().await {
                Ok(true) => return Ok(()),
                Ok(false) => "relay did not accept the connection".to_string(),
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };

        Err(TransportUnavailable {
            account: self.account.identity.clone(),
            reason,
        })
    }

    /// Current transport, rebuilt if it was released or, when `for_message`
    /// is set, if the pool is due for recycling
    fn transport(&self, for_message: bool) -> Result<Arc<Transport>, SmtpError> {
        let mut pool = self.pool.lock();

        let recycle = for_message
            && self
                .config
                .recycle_after_messages
                .is_some_and(|limit| pool.sent >= limit.max(1));
        if recycle {
            internal!(
                "Recycling connection pool for {} after {} messages",
                self.account.identity,
                pool.sent
            );
        }

        let transport = match &pool.transport {
            Some(transport) if !recycle => Arc::clone(transport),
            _ => {
                let transport = Arc::new(build_transport(&self.account, &self.config)?);
                pool.transport = Some(Arc::clone(&transport));
                pool.sent = 0;
                transport
            }
        };

        if for_message {
            pool.sent += 1;
        }
        Ok(transport)
    }

    /// Transport for the next message
    fn checkout(&self) -> Result<Arc<Transport>, SendError> {
        self.transport(true)
            .map_err(|e| SendError::temporary(e.to_string()))
    }

    async fn build_message(&self, message: &MessageUnit) -> Result<Message, SendError> {
        let to: Mailbox = message.recipient.parse().map_err(|e| {
            SendError::permanent(format!("invalid recipient {}: {e}", message.recipient))
        })?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone());

        let content = Content::from(&message.body);
        let built = match &message.attachment {
            None => match content {
                Content::Single(part) => builder.singlepart(part),
                Content::Multi(parts) => builder.multipart(parts),
            },
            Some(attachment) => {
                let bytes = match &attachment.content {
                    AttachmentContent::Inline(bytes) => bytes.clone(),
                    AttachmentContent::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                        SendError::permanent(format!(
                            "cannot read attachment {}: {e}",
                            path.display()
                        ))
                    })?,
                };
                let content_type = ContentType::parse(
                    attachment
                        .content_type
                        .as_deref()
                        .unwrap_or("application/octet-stream"),
                )
                .map_err(|e| SendError::permanent(format!("invalid attachment type: {e}")))?;
                let part = Attachment::new(attachment.filename.clone()).body(bytes, content_type);

                let mixed = match content {
                    Content::Single(body) => MultiPart::mixed().singlepart(body),
                    Content::Multi(body) => MultiPart::mixed().multipart(body),
                };
                builder.multipart(mixed.singlepart(part))
            }
        };

        built.map_err(|e| SendError::permanent(format!("cannot build message: {e}")))
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&self, message: &MessageUnit) -> Result<(), SendError> {
        let email = self.build_message(message).await?;
        let transport = self.checkout()?;

        outgoing!(
            level = DEBUG,
            "Sending to {} via {}:{}",
            message.recipient,
            self.account.host,
            self.account.port
        );

        match transport.send(email).await {
            Ok(response) => {
                outgoing!(
                    "{} accepted message for {}: {:?}",
                    self.account.host,
                    message.recipient,
                    response.code()
                );
                Ok(())
            }
            Err(e) => Err(classify(&e)),
        }
    }

    async fn release(&self) {
        let released = {
            let mut pool = self.pool.lock();
            internal!(
                "Releasing connections to {} after {} messages",
                self.account.host,
                pool.sent
            );
            pool.sent = 0;
            pool.transport.take()
        };

        // Idle connections are closed once the last handle to the pool goes
        drop(released);
    }
}

/// Builds an [`SmtpSender`] per account
#[derive(Debug, Clone, Default)]
pub struct SmtpTransportFactory {
    config: SmtpTransportConfig,
}

impl SmtpTransportFactory {
    pub const fn new(config: SmtpTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for SmtpTransportFactory {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn Sender>, TransportUnavailable> {
        let sender = SmtpSender::new(account.clone(), self.config.clone())?;
        if self.config.verify_on_connect {
            sender.verify().await?;
        }

        Ok(Arc::new(sender))
    }
}
