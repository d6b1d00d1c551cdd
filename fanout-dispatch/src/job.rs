//! Per-job state: the request, the dispatch plan, outcomes and the report
//!
//! A [`Job`] is built fresh for every request and consumed into a
//! [`JobReport`]. Nothing outlives it.

use std::{fmt, sync::Arc};

use fanout_common::{Account, Attachment, Body, MessageUnit, tracing::{info, warn}};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    config::UsageCaps,
    error::{DispatchFailure, InvalidJob},
    pool::{AccountPool, AccountUsage},
};

/// The request shape handed over by the caller: one message template fanned
/// out to many recipients, plus any fully-specified messages.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub accounts: Vec<Account>,

    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub body: Body,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,

    /// Messages dispatched after the template's recipients
    #[serde(default)]
    pub messages: Vec<MessageUnit>,
}

impl JobRequest {
    /// Split into the account pool and one unit per message
    pub fn into_parts(self) -> (Vec<Account>, Vec<MessageUnit>) {
        let Self {
            accounts,
            recipients,
            subject,
            body,
            attachment,
            messages,
        } = self;

        let mut units: Vec<_> = recipients
            .into_iter()
            .map(|recipient| MessageUnit {
                recipient,
                subject: subject.clone(),
                body: body.clone(),
                attachment: attachment.clone(),
                order_hint: None,
            })
            .collect();
        units.extend(messages);

        (accounts, units)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Sent,
    Failed,
}

/// What happened to one message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    /// Position of the message in the job's input
    pub index: usize,
    pub recipient: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DispatchFailure>,
    /// Identity of the account the message went through, if one was selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub attempts: u32,
    pub log_line: String,
}

impl SendOutcome {
    pub fn sent(index: usize, recipient: &str, account: &str, attempts: u32) -> Self {
        Self {
            index,
            recipient: recipient.to_string(),
            status: OutcomeStatus::Sent,
            failure: None,
            account: Some(account.to_string()),
            attempts,
            log_line: format!("sent to {recipient} via {account}"),
        }
    }

    pub fn failed(
        index: usize,
        recipient: &str,
        account: Option<&str>,
        attempts: u32,
        failure: DispatchFailure,
    ) -> Self {
        let log_line = account.map_or_else(
            || format!("failed to send to {recipient}: {failure}"),
            |account| format!("failed to send to {recipient} via {account}: {failure}"),
        );

        Self {
            index,
            recipient: recipient.to_string(),
            status: OutcomeStatus::Failed,
            failure: Some(failure),
            account: account.map(str::to_string),
            attempts,
            log_line,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == OutcomeStatus::Sent
    }
}

/// The aggregate result of a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub total_messages: usize,
    pub sent_count: usize,
    pub failed_recipients: Vec<String>,
    /// One line per message, in completion order
    pub log_lines: Vec<String>,
    /// One outcome per message, in input order
    pub outcomes: Vec<SendOutcome>,
    pub usage: Vec<AccountUsage>,
}

/// A unit scheduled for dispatch, tagged with its input position
#[derive(Clone, Debug)]
pub struct PlannedUnit {
    pub index: usize,
    pub unit: MessageUnit,
}

/// One job's state from validation to report
pub struct Job {
    id: Ulid,
    pool: Arc<AccountPool>,
    plan: Vec<PlannedUnit>,
    recipients: Vec<String>,
    outcomes: Vec<Option<SendOutcome>>,
    log_lines: Vec<String>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("messages", &self.outcomes.len())
            .finish_non_exhaustive()
    }
}

fn validate(units: &[MessageUnit]) -> Result<(), InvalidJob> {
    if units.is_empty() {
        return Err(InvalidJob::NoMessages);
    }

    for (index, unit) in units.iter().enumerate() {
        if unit.recipient.trim().is_empty() {
            return Err(InvalidJob::MissingRecipient { index });
        }
        if unit.body.is_empty() {
            return Err(InvalidJob::MissingBody {
                index,
                recipient: unit.recipient.clone(),
            });
        }
    }

    Ok(())
}

impl Job {
    /// Validate the input and set up a fresh pool.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidJob`] for an empty or duplicated pool, an empty
    /// message list, or a message missing its recipient or body
    pub fn new(
        accounts: Vec<Account>,
        units: Vec<MessageUnit>,
        caps: &UsageCaps,
    ) -> Result<Self, InvalidJob> {
        validate(&units)?;
        let pool = Arc::new(AccountPool::new(accounts, caps)?);

        let recipients = units.iter().map(|unit| unit.recipient.clone()).collect();
        let mut plan: Vec<_> = units
            .into_iter()
            .enumerate()
            .map(|(index, unit)| PlannedUnit { index, unit })
            .collect();
        // Hinted units first by hint, the rest keep their input order
        plan.sort_by_key(|planned| planned.unit.order_hint.map_or((1, 0), |hint| (0, hint)));

        let total = plan.len();
        Ok(Self {
            id: Ulid::new(),
            pool,
            plan,
            recipients,
            outcomes: vec![None; total],
            log_lines: Vec::with_capacity(total),
        })
    }

    pub const fn id(&self) -> Ulid {
        self.id
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Hand the dispatch plan to the orchestrator, in dispatch order
    pub fn take_plan(&mut self) -> Vec<PlannedUnit> {
        std::mem::take(&mut self.plan)
    }

    /// Append an outcome, keyed by message index
    pub fn record(&mut self, outcome: SendOutcome) {
        info!(job = %self.id, "{}", outcome.log_line);

        self.log_lines.push(outcome.log_line.clone());
        let index = outcome.index;
        if let Some(slot) = self.outcomes.get_mut(index) {
            *slot = Some(outcome);
        }
    }

    /// Fail a unit that never got an account
    pub fn record_unreached(&mut self, planned: &PlannedUnit) {
        self.record(SendOutcome::failed(
            planned.index,
            &planned.unit.recipient,
            None,
            0,
            DispatchFailure::PoolExhausted,
        ));
    }

    pub fn has_outcome(&self, index: usize) -> bool {
        self.outcomes.get(index).is_some_and(Option::is_some)
    }

    /// Build the report. Every planned message is counted; a message
    /// left without an outcome is reported as an internal failure.
    pub fn into_report(mut self) -> JobReport {
        let usage = self.pool.usage();
        let total_messages = self.outcomes.len();

        for index in 0..total_messages {
            if !self.has_outcome(index) {
                warn!(job = %self.id, index, "message finished without an outcome");
                let recipient = self.recipients.get(index).cloned().unwrap_or_default();
                self.record(SendOutcome::failed(
                    index,
                    &recipient,
                    None,
                    0,
                    DispatchFailure::Internal("no outcome recorded".to_string()),
                ));
            }
        }

        let outcomes: Vec<SendOutcome> = self.outcomes.into_iter().flatten().collect();
        debug_assert_eq!(outcomes.len(), total_messages);

        JobReport {
            job_id: self.id.to_string(),
            total_messages,
            sent_count: outcomes.iter().filter(|outcome| outcome.is_sent()).count(),
            failed_recipients: outcomes
                .iter()
                .filter(|outcome| !outcome.is_sent())
                .map(|outcome| outcome.recipient.clone())
                .collect(),
            log_lines: self.log_lines,
            outcomes,
            usage,
        }
    }
}
