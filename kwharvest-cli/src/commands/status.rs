//! Status command - queue, credential and provider overview.

use anyhow::Result;
use kwharvest_core::QueueStats;
use kwharvest_fetch::{CredentialReport, ProviderHealth, SlotUsage};
use serde::Serialize;
use tracing::info;

use crate::Cli;
use crate::context::App;
use crate::output::emit;

#[derive(Serialize)]
struct StatusOutput {
    queue: QueueStats,
    providers: Vec<ProviderHealth>,
    credentials: Vec<CredentialReport>,
    slots: Vec<SlotUsage>,
}

/// Runs the status command.
pub async fn run(cli: &Cli) -> Result<()> {
    info!("Collecting status");

    let app = App::open(cli)?;
    let now = app.credentials.now();

    let output = StatusOutput {
        queue: app.scheduler.get_queue_stats().await?,
        providers: app.credentials.provider_health().await?,
        credentials: app.credentials.credential_status().await?,
        slots: app.admission.slot_stats(),
    };

    emit(cli, &output, |f| {
        [
            f.format_queue_stats(&output.queue),
            f.format_provider_health(&output.providers),
            f.format_credentials(&output.credentials, now),
        ]
        .join("\n\n")
    })
}
