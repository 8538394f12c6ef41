use std::sync::Arc;

use anyhow::{Context, Result};
use role_harvest::{Feedback, Progress, Synchronizer, TableSink};
use role_harvest_iam::{IamRoleSource, IamRoleSourceConfig};

use crate::config::AppConfig;

/// Print feedback items to stderr.
pub fn print_feedback(feedback: &[Feedback]) {
    for item in feedback {
        eprintln!("{item}");
    }
}

fn print_progress(progress: &Progress) {
    match progress {
        Progress::Enriched(name) => println!("Successfully processed role {name}"),
        Progress::Skipped(name) => eprintln!("Skipped role {name}: no longer exists"),
        Progress::Phase(_) => {}
    }
}

fn source_config(config: &AppConfig, token: Option<String>) -> IamRoleSourceConfig {
    IamRoleSourceConfig {
        parent: config.parent.clone(),
        page_size: config.page_size,
        show_deleted: config.show_deleted,
        token,
        api_base_url: config.api_base_url.clone(),
        request_timeout: config.request_timeout(),
    }
}

/// Run one harvest pass and print progress to stdout, warnings to stderr.
///
/// Any failure is returned as an error; the caller turns it into a non-zero
/// exit status.
pub async fn run(config: &AppConfig, token: Option<String>) -> Result<()> {
    let table = Arc::new(super::open_table(config)?);
    let destination = table.destination();

    println!("Starting role harvest. Roles will be stored in {destination}");

    let source = IamRoleSource::new(source_config(config, token))
        .context("failed to set up IAM client")?;

    let mut sync = Synchronizer::new(Arc::new(source), table.clone())
        .with_concurrency(config.concurrency)
        .with_batch_size(config.batch_size)
        .with_progress(Box::new(print_progress));
    if let Some(deadline) = config.pass_deadline() {
        sync = sync.with_deadline(deadline);
    }

    let report = sync.run().await.context("harvest did not complete")?;

    print_feedback(&report.feedback);

    if let Err(e) = table.record_harvest(report.processed) {
        tracing::warn!(%destination, error = %e, "failed to record harvest");
    }

    println!(
        "Harvest completed: {} roles written to {destination} ({} skipped).",
        report.processed, report.skipped
    );

    Ok(())
}
