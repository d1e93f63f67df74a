//! Seed command - register a seed keyword.

use anyhow::Result;
use clap::Args;
use kwharvest_core::{JobKind, Keyword};
use kwharvest_queue::CollectReport;
use serde::Serialize;

use crate::Cli;
use crate::context::App;
use crate::output::emit;

/// Arguments for the seed command.
#[derive(Args)]
pub struct SeedArgs {
    /// Search term to seed (trimmed and lowercased).
    pub term: String,

    /// Queue a related-keyword collection right away.
    #[arg(long)]
    pub collect: bool,
}

#[derive(Serialize)]
struct SeedOutput {
    keyword: Keyword,
    #[serde(skip_serializing_if = "Option::is_none")]
    collected: Option<CollectReport>,
}

/// Runs the seed command.
pub async fn run(args: &SeedArgs, cli: &Cli) -> Result<()> {
    let app = App::open(cli)?;
    let keyword = app.collector.seed(&args.term).await?;

    let collected = if args.collect {
        app.sync_credentials().await?;
        Some(app.collector.collect(JobKind::FetchRelated, None).await?)
    } else {
        None
    };

    let output = SeedOutput { keyword, collected };
    emit(cli, &output, |f| {
        let mut text = f.format_keyword(&output.keyword);
        if let Some(report) = &output.collected {
            text.push('\n');
            text.push_str(&f.format_collect(report));
        }
        text
    })
}
