use std::{path::Path, sync::Arc};

use fanout_common::internal;
use fanout_dispatch::{DispatchConfig, Dispatcher, JobReport, JobRequest, SmtpTransportFactory};
use serde::Deserialize;

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
pub struct Fanout {
    #[serde(alias = "dispatcher", default)]
    pub dispatch: DispatchConfig,
}

impl Fanout {
    /// Read the configuration from a RON file
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Ok(ron::from_str(&content)?)
    }

    /// A dispatcher sending through real SMTP relays
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.dispatch.clone(),
            Arc::new(SmtpTransportFactory::new(self.dispatch.transport.clone())),
        )
    }

    /// Run a single job to completion
    ///
    /// # Errors
    ///
    /// Fails if the job is invalid; failed messages are reported, not
    /// returned as errors
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(&self, job: JobRequest) -> anyhow::Result<JobReport> {
        internal!("Running job with {} accounts", job.accounts.len());

        Ok(self.dispatcher().run_request(job).await?)
    }
}

/// Render a report as pretty RON
///
/// # Errors
///
/// Fails if the report cannot be serialized
pub fn render_report(report: &JobReport) -> anyhow::Result<String> {
    Ok(ron::ser::to_string_pretty(
        report,
        ron::ser::PrettyConfig::default(),
    )?)
}
