//! Senders and the per-job sender cache
//!
//! A [`Sender`] is the opaque send capability bound to one account. A
//! [`TransportFactory`] builds one per account; the [`SenderCache`] makes
//! that idempotent for the lifetime of a job, failures included, so an
//! account whose relay is unreachable is tried once and every message routed
//! to it fails fast with the same [`TransportUnavailable`].

pub mod smtp;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use fanout_common::{Account, MessageUnit, internal, tracing::warn};
use tokio::sync::OnceCell;

use crate::error::{SendError, TransportUnavailable};

/// Send capability bound to one account
#[async_trait]
pub trait Sender: Send + Sync {
    /// Make one delivery attempt
    async fn send(&self, message: &MessageUnit) -> Result<(), SendError>;

    /// Release pooled connections once the job no longer needs them
    async fn release(&self) {}
}

/// Builds a [`Sender`] for an account
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn Sender>, TransportUnavailable>;
}

type CachedSender = Result<Arc<dyn Sender>, TransportUnavailable>;

/// One sender per account identity for the duration of a job
pub struct SenderCache {
    factory: Arc<dyn TransportFactory>,
    senders: DashMap<String, Arc<OnceCell<CachedSender>>>,
}

impl fmt::Debug for SenderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderCache")
            .field("accounts", &self.senders.len())
            .finish_non_exhaustive()
    }
}

impl SenderCache {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            senders: DashMap::new(),
        }
    }

    /// Get the sender for `account`, building it on first use.
    ///
    /// Concurrent callers for the same account share a single build.
    ///
    /// # Errors
    ///
    /// Returns the (cached) [`TransportUnavailable`] if the sender could not
    /// be built
    pub async fn get_sender(&self, account: &Account) -> Result<Arc<dyn Sender>, TransportUnavailable> {
        let cell = self
            .senders
            .entry(account.identity.clone())
            .or_default()
            .value()
            .clone();

        cell.get_or_init(|| async {
            internal!("Building sender for {}", account);
            let sender = self.factory.connect(account).await;
            if let Err(e) = &sender {
                warn!(account = %account.identity, error = %e, "Transport unavailable");
            }
            sender
        })
        .await
        .clone()
    }

    /// Release every sender built so far and forget them
    pub async fn release_all(&self) {
        let senders: Vec<_> = self
            .senders
            .iter()
            .filter_map(|entry| entry.value().get().and_then(|built| built.as_ref().ok()).cloned())
            .collect();
        self.senders.clear();

        for sender in senders {
            sender.release().await;
        }
    }
}
