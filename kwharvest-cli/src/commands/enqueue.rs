//! Enqueue command - queue jobs for explicit keyword ids.

use anyhow::Result;
use clap::Args;
use kwharvest_core::JobKind;
use serde::Serialize;

use crate::context::App;
use crate::output::emit;
use crate::{Cli, KindArg};

/// Arguments for the enqueue command.
#[derive(Args)]
pub struct EnqueueArgs {
    /// Job kind to create.
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Keyword ids, split into batches.
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<i64>,

    /// Keywords per job (defaults from the queue config).
    #[arg(long, short)]
    pub batch_size: Option<usize>,
}

#[derive(Serialize)]
struct EnqueueOutput {
    kind: JobKind,
    job_ids: Vec<i64>,
}

/// Runs the enqueue command.
pub async fn run(args: &EnqueueArgs, cli: &Cli) -> Result<()> {
    let app = App::open(cli)?;
    let kind = JobKind::from(args.kind);

    let job_ids = app
        .scheduler
        .enqueue_batch(kind, &args.ids, args.batch_size)
        .await?;

    let output = EnqueueOutput { kind, job_ids };
    emit(cli, &output, |f| f.format_enqueued(output.kind, &output.job_ids))
}
