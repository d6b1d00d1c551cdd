//! Round-robin account rotation under a per-account usage cap
//!
//! The pool owns the rotation cursor and the usage counters for one job. Both
//! live behind a single mutex, so selecting an account and recording its use
//! are indivisible even when many sends complete at once.
//!
//! Selection hands out a [`Reservation`] rather than a bare account. A
//! reservation holds one slot of the account's cap while the send is in
//! flight:
//! - [`Reservation::commit`] turns the slot into a counted use
//! - dropping it uncommitted gives the slot back
//!
//! Counting in-flight sends against the cap is what keeps concurrent dispatch
//! from overshooting it.

use std::{fmt, pin::pin, sync::Arc};

use fanout_common::{Account, internal};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::{
    config::UsageCaps,
    error::{InvalidJob, PoolExhausted},
};

#[derive(Debug)]
struct PoolState {
    /// Index of the next account to test
    cursor: usize,
    /// Committed (successful) sends per account
    usage: Vec<u32>,
    /// In-flight reservations per account
    reserved: Vec<u32>,
}

enum Selection {
    Reserved(usize),
    /// Every account is at its cap once in-flight sends are counted, but some
    /// of those may still fail and hand their slot back
    Saturated,
    Exhausted,
}

/// Per-account usage snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUsage {
    pub identity: String,
    pub sent: u32,
    pub cap: u32,
}

pub struct AccountPool {
    accounts: Vec<Account>,
    caps: Vec<u32>,
    state: parking_lot::Mutex<PoolState>,
    released: Notify,
}

impl fmt::Debug for AccountPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountPool")
            .field("accounts", &self.accounts.len())
            .field("caps", &self.caps)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl AccountPool {
    /// Build a pool for one job, with all counters at zero.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidJob`] if `accounts` is empty or an identity repeats
    pub fn new(accounts: Vec<Account>, caps: &UsageCaps) -> Result<Self, InvalidJob> {
        if accounts.is_empty() {
            return Err(InvalidJob::NoAccounts);
        }

        let mut seen = ahash::AHashSet::with_capacity(accounts.len());
        for account in &accounts {
            if !seen.insert(account.identity.as_str()) {
                return Err(InvalidJob::DuplicateAccount(account.identity.clone()));
            }
        }

        let caps = accounts
            .iter()
            .map(|account| caps.cap_for(&account.identity))
            .collect();
        let len = accounts.len();

        Ok(Self {
            accounts,
            caps,
            state: parking_lot::Mutex::new(PoolState {
                cursor: 0,
                usage: vec![0; len],
                reserved: vec![0; len],
            }),
            released: Notify::new(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    fn try_reserve(&self) -> Selection {
        let mut state = self.state.lock();
        let len = self.accounts.len();
        let mut saturated = false;

        for _ in 0..len {
            let index = state.cursor;
            state.cursor = (state.cursor + 1) % len;

            let cap = self.caps[index];
            if state.usage[index] >= cap {
                continue;
            }
            if state.usage[index] + state.reserved[index] >= cap {
                saturated = true;
                continue;
            }

            state.reserved[index] += 1;
            return Selection::Reserved(index);
        }

        if saturated {
            Selection::Saturated
        } else {
            Selection::Exhausted
        }
    }

    fn reservation(self: &Arc<Self>, index: usize) -> Reservation {
        internal!(
            "Selected account {} ({}/{} used)",
            self.accounts[index].identity,
            self.state.lock().usage[index],
            self.caps[index]
        );

        Reservation {
            pool: Arc::clone(self),
            index,
            committed: false,
        }
    }

    /// Select the next eligible account without waiting.
    ///
    /// Accounts with sends still in flight count those sends against their
    /// cap, so an account may be skipped here and become eligible again once
    /// one of its sends fails.
    ///
    /// # Errors
    ///
    /// Returns [`PoolExhausted`] when no account has room left
    pub fn select_account(self: &Arc<Self>) -> Result<Reservation, PoolExhausted> {
        match self.try_reserve() {
            Selection::Reserved(index) => Ok(self.reservation(index)),
            Selection::Saturated | Selection::Exhausted => Err(PoolExhausted),
        }
    }

    /// Select the next eligible account, waiting for in-flight sends to
    /// settle when they are the only thing holding every account at its cap.
    ///
    /// # Errors
    ///
    /// Returns [`PoolExhausted`] once every account's committed usage has
    /// reached its cap
    pub async fn acquire(self: &Arc<Self>) -> Result<Reservation, PoolExhausted> {
        loop {
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();

            match self.try_reserve() {
                Selection::Reserved(index) => return Ok(self.reservation(index)),
                Selection::Exhausted => return Err(PoolExhausted),
                Selection::Saturated => {
                    internal!("All accounts busy at their cap, waiting for in-flight sends");
                    released.await;
                }
            }
        }
    }

    /// Committed usage of every account, in pool order
    pub fn usage(&self) -> Vec<AccountUsage> {
        let state = self.state.lock();
        self.accounts
            .iter()
            .zip(&self.caps)
            .zip(&state.usage)
            .map(|((account, cap), sent)| AccountUsage {
                identity: account.identity.clone(),
                sent: *sent,
                cap: *cap,
            })
            .collect()
    }

    fn settle(&self, index: usize, success: bool) {
        {
            let mut state = self.state.lock();
            state.reserved[index] -= 1;
            if success {
                state.usage[index] += 1;
            }
        }
        self.released.notify_waiters();
    }
}

/// A slot on one account's cap, held while a send is in flight
#[derive(Debug)]
pub struct Reservation {
    pool: Arc<AccountPool>,
    index: usize,
    committed: bool,
}

impl Reservation {
    pub fn account(&self) -> &Account {
        &self.pool.accounts[self.index]
    }

    /// Count the send against the account's usage
    pub fn commit(mut self) {
        self.committed = true;
        self.pool.settle(self.index, true);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.settle(self.index, false);
        }
    }
}
