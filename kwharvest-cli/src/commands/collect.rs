//! Collect command - queue jobs for keywords waiting in the pipeline.

use anyhow::Result;
use clap::Args;
use kwharvest_core::JobKind;

use crate::context::App;
use crate::output::emit;
use crate::{Cli, KindArg};

/// Arguments for the collect command.
#[derive(Args)]
pub struct CollectArgs {
    /// Stage to collect for.
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Maximum number of keywords to pick up (300 related, 800 docs by default).
    #[arg(long, short)]
    pub limit: Option<usize>,
}

/// Runs the collect command.
pub async fn run(args: &CollectArgs, cli: &Cli) -> Result<()> {
    let app = App::open(cli)?;
    app.sync_credentials().await?;

    let report = app
        .collector
        .collect(JobKind::from(args.kind), args.limit)
        .await?;

    emit(cli, &report, |f| f.format_collect(&report))
}
