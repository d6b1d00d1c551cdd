//! Shared fakes for dispatch integration tests
#![allow(dead_code)] // Not every test binary uses every helper

pub mod mock_relay;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use fanout_common::{Account, Body, MessageUnit};
use fanout_dispatch::{
    DispatchConfig, DispatchMode, RateLimitConfig, RetryPolicy, SendError, Sender,
    TransportFactory, TransportUnavailable, UsageCaps,
};
use parking_lot::Mutex;

#[derive(Default)]
struct FakeState {
    /// Scripted results per recipient; once a script runs out, sends succeed
    scripts: Mutex<HashMap<String, VecDeque<Result<(), SendError>>>>,
    /// Recipients that fail on every attempt
    always_failing: Mutex<HashMap<String, SendError>>,
    unavailable: Mutex<HashSet<String>>,
    /// `(account, recipient)` for every successful send, in completion order
    delivered: Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
    connects: AtomicUsize,
    released: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

/// A transport whose per-recipient behaviour is scripted up front
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` attempts to `recipient` temporarily, then succeed
    pub fn fail_temporarily(&self, recipient: &str, times: usize) -> &Self {
        self.state
            .scripts
            .lock()
            .entry(recipient.to_string())
            .or_default()
            .extend((0..times).map(|_| Err(SendError::temporary("421 try again later"))));
        self
    }

    /// Fail every attempt to `recipient` with a temporary error
    pub fn always_fail(&self, recipient: &str) -> &Self {
        self.state.always_failing.lock().insert(
            recipient.to_string(),
            SendError::temporary("451 mailbox busy"),
        );
        self
    }

    /// Permanently reject `recipient`
    pub fn reject(&self, recipient: &str) -> &Self {
        self.state.always_failing.lock().insert(
            recipient.to_string(),
            SendError::permanent("550 no such user"),
        );
        self
    }

    /// Refuse to build a sender for `identity`
    pub fn unavailable(&self, identity: &str) -> &Self {
        self.state.unavailable.lock().insert(identity.to_string());
        self
    }

    /// Make every send take `delay`
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *self.state.delay.lock() = Some(delay);
        self
    }

    pub fn delivered(&self) -> Vec<(String, String)> {
        self.state.delivered.lock().clone()
    }

    pub fn delivered_via(&self) -> Vec<String> {
        self.delivered().into_iter().map(|(account, _)| account).collect()
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(self.clone())
    }
}

struct FakeSender {
    identity: String,
    state: Arc<FakeState>,
}

impl FakeSender {
    fn next_result(&self, recipient: &str) -> Result<(), SendError> {
        if let Some(error) = self.state.always_failing.lock().get(recipient) {
            return Err(error.clone());
        }

        self.state
            .scripts
            .lock()
            .get_mut(recipient)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl Sender for FakeSender {
    async fn send(&self, message: &MessageUnit) -> Result<(), SendError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.next_result(&message.recipient);
        if result.is_ok() {
            self.state
                .delivered
                .lock()
                .push((self.identity.clone(), message.recipient.clone()));
        }

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn release(&self) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportFactory for FakeTransport {
    async fn connect(&self, account: &Account) -> Result<Arc<dyn Sender>, TransportUnavailable> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if self.state.unavailable.lock().contains(&account.identity) {
            return Err(TransportUnavailable {
                account: account.identity.clone(),
                reason: "connection refused".to_string(),
            });
        }

        Ok(Arc::new(FakeSender {
            identity: account.identity.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

pub fn accounts(count: usize) -> Vec<Account> {
    (0..count)
        .map(|i| Account::new(format!("sender{i}@example.com"), "smtp.example.com", 587))
        .collect()
}

pub fn recipient(i: usize) -> String {
    format!("user{i}@example.org")
}

pub fn messages(count: usize) -> Vec<MessageUnit> {
    (0..count)
        .map(|i| MessageUnit::new(recipient(i), "Hello", Body::plain("Hi there")))
        .collect()
}

/// Configuration with no pacing and fast retries
pub fn config(cap: u32, mode: DispatchMode) -> DispatchConfig {
    DispatchConfig {
        usage_caps: UsageCaps::uniform(cap),
        mode,
        rate_limit: RateLimitConfig {
            max_in_flight: 4,
            ..RateLimitConfig::default()
        },
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 10_000,
            ..RetryPolicy::default()
        },
        ..DispatchConfig::default()
    }
}
