//! Run a bulk dispatch job described in a RON file
//!
//! ```text
//! fanout --config fanout.config.ron job.ron
//! ```
//!
//! The report is printed to stdout as RON. Logs go to stderr, filtered by
//! `LOG_LEVEL`.

use std::path::PathBuf;

use clap::Parser;
use fanout::{
    Fanout,
    config::{CONFIG_ENV, default_config_paths, find_config_file, load_job},
    controller::render_report,
};
use fanout_common::logging;

#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(about = "Send a batch of messages through a rotating pool of accounts", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Exit with a failure status if any message could not be sent
    #[arg(long)]
    strict: bool,

    /// Job description (accounts, recipients, message)
    job: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config.as_deref(), &default_config_paths())?;
    let fanout = Fanout::load(&config_path)?;
    let job = load_job(&cli.job)?;

    logging::init();

    let report = fanout.run(job).await?;
    println!("{}", render_report(&report)?);

    if cli.strict && !report.failed_recipients.is_empty() {
        anyhow::bail!(
            "{} of {} messages failed",
            report.failed_recipients.len(),
            report.total_messages
        );
    }

    Ok(())
}
