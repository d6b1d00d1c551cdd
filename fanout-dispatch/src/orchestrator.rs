//! Runs a job: validation, account selection, admission, retries, reporting
//!
//! ```text
//! plan ──> pool ──> sender cache ──> rate limiter ──> retry executor ──> outcome
//!          (account)  (sender)         (permit)          (attempts)
//! ```
//!
//! Every planned unit ends with exactly one [`SendOutcome`], whatever the
//! dispatch mode and whatever order the sends complete in.

use std::sync::Arc;

use fanout_common::{
    Account, MessageUnit, internal, logging,
    tracing::{Instrument, error, info},
};
use tokio::task::JoinSet;

use crate::{
    config::{DispatchConfig, DispatchMode},
    error::{DispatchError, DispatchFailure},
    job::{Job, JobReport, JobRequest, PlannedUnit, SendOutcome},
    pool::{AccountPool, Reservation},
    rate_limiter::RateLimiter,
    retry::RetryExecutor,
    transport::{SenderCache, TransportFactory},
};

/// Everything one job's sends share. Dropped with the job.
#[derive(Debug)]
struct JobContext {
    pool: Arc<AccountPool>,
    senders: SenderCache,
    limiter: RateLimiter,
    executor: RetryExecutor,
}

impl JobContext {
    /// Send one unit through the account held by `reservation`.
    ///
    /// The reservation is committed only if the send finally succeeds; on any
    /// failure it is dropped and the account's slot is handed back.
    #[tracing::instrument(
        skip_all,
        fields(index = planned.index, recipient = %planned.unit.recipient, account = %reservation.account().identity)
    )]
    async fn deliver(&self, reservation: Reservation, planned: &PlannedUnit) -> SendOutcome {
        let PlannedUnit { index, unit } = planned;
        let identity = reservation.account().identity.clone();

        let sender = match self.senders.get_sender(reservation.account()).await {
            Ok(sender) => sender,
            Err(unavailable) => {
                return SendOutcome::failed(
                    *index,
                    &unit.recipient,
                    Some(&identity),
                    0,
                    unavailable.into(),
                );
            }
        };

        let attempted = {
            let _permit = self.limiter.admit().await;
            self.executor.attempt(unit, sender.as_ref()).await
        };

        match attempted.result {
            Ok(()) => {
                reservation.commit();
                SendOutcome::sent(*index, &unit.recipient, &identity, attempted.attempts)
            }
            Err(failure) => SendOutcome::failed(
                *index,
                &unit.recipient,
                Some(&identity),
                attempted.attempts,
                failure,
            ),
        }
    }
}

/// Entry point for running jobs.
///
/// Holds only read-only configuration and the transport factory; each call
/// builds its own [`Job`] and per-job state, so nothing carries over between
/// jobs.
pub struct Dispatcher {
    config: DispatchConfig,
    factory: Arc<dyn TransportFactory>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self { config, factory }
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Expand a request into units and run it
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::run_job`]
    pub async fn run_request(&self, request: JobRequest) -> Result<JobReport, DispatchError> {
        let (accounts, units) = request.into_parts();
        self.run_job(accounts, units).await
    }

    /// Dispatch `units` across `accounts`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidJob`] before anything is sent if the
    /// pool or message list is empty, an account is listed twice, or a
    /// message has no recipient or body. Per-message failures never surface
    /// here; they are in the report.
    pub async fn run_job(
        &self,
        accounts: Vec<Account>,
        units: Vec<MessageUnit>,
    ) -> Result<JobReport, DispatchError> {
        let mut job = Job::new(accounts, units, &self.config.usage_caps)?;

        let context = Arc::new(JobContext {
            pool: Arc::clone(job.pool()),
            senders: SenderCache::new(Arc::clone(&self.factory)),
            limiter: RateLimiter::new(&self.config.rate_limit),
            executor: RetryExecutor::new(self.config.retry.clone()),
        });

        info!(
            job = %job.id(),
            messages = job.len(),
            accounts = context.pool.len(),
            mode = ?self.config.mode,
            "Starting job"
        );

        let span = logging::job_span(job.id(), job.len());
        async {
            match self.config.mode {
                DispatchMode::Sequential => run_sequential(&mut job, &context).await,
                DispatchMode::Concurrent => {
                    let plan = job.take_plan();
                    let size = plan.len();
                    run_batched(&mut job, &context, plan, size).await;
                }
                DispatchMode::Batched { size } => {
                    let plan = job.take_plan();
                    run_batched(&mut job, &context, plan, size.max(1)).await;
                }
            }

            context.senders.release_all().await;
        }
        .instrument(span)
        .await;

        let report = job.into_report();
        info!(
            job = %report.job_id,
            sent = report.sent_count,
            failed = report.failed_recipients.len(),
            "Job finished"
        );

        Ok(report)
    }
}

async fn run_sequential(job: &mut Job, context: &JobContext) {
    let mut plan = job.take_plan().into_iter();

    for planned in plan.by_ref() {
        let Ok(reservation) = context.pool.select_account() else {
            internal!("Pool exhausted, failing remaining messages");
            job.record_unreached(&planned);
            break;
        };

        let outcome = context.deliver(reservation, &planned).await;
        job.record(outcome);
    }

    for planned in plan {
        job.record_unreached(&planned);
    }
}

/// Dispatch `plan` in groups of `size`, each group running concurrently and
/// draining before the next one is scheduled.
///
/// Accounts are reserved in plan order before a unit's task is spawned, so
/// rotation follows the plan regardless of how tasks are scheduled.
#[tracing::instrument(skip_all, fields(batch = size))]
async fn run_batched(job: &mut Job, context: &Arc<JobContext>, plan: Vec<PlannedUnit>, size: usize) {
    let mut plan = plan.into_iter().peekable();
    let mut exhausted = false;

    while plan.peek().is_some() && !exhausted {
        let mut tasks = JoinSet::new();
        let mut spawned = Vec::new();

        for planned in plan.by_ref().take(size) {
            let Ok(reservation) = context.pool.acquire().await else {
                internal!("Pool exhausted, failing remaining messages");
                job.record_unreached(&planned);
                exhausted = true;
                break;
            };

            spawned.push((planned.index, planned.unit.recipient.clone()));
            let context = Arc::clone(context);
            tasks.spawn(
                async move { context.deliver(reservation, &planned).await }.in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => job.record(outcome),
                Err(e) => error!("Dispatch task failed: {e}"),
            }
        }

        for (index, recipient) in spawned {
            if !job.has_outcome(index) {
                job.record(SendOutcome::failed(
                    index,
                    &recipient,
                    None,
                    0,
                    DispatchFailure::Internal("task ended without an outcome".to_string()),
                ));
            }
        }
    }

    for planned in plan {
        job.record_unreached(&planned);
    }
}
