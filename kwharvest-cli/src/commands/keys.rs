//! Keys command - credential administration.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

use crate::Cli;
use crate::context::App;
use crate::output::emit;

/// Arguments for the keys command.
#[derive(Args)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub action: KeysAction,
}

/// Keys subcommands.
#[derive(Subcommand)]
pub enum KeysAction {
    /// List credentials with their selection state.
    List,

    /// Upsert the configured credentials into the database.
    Sync,

    /// Re-enable a disabled or cooling credential.
    Enable {
        /// Credential id.
        id: i64,
    },

    /// Reset today's usage of every active credential.
    ResetQuota,
}

/// Runs the keys command.
pub async fn run(args: &KeysArgs, cli: &Cli) -> Result<()> {
    let app = App::open(cli)?;

    match &args.action {
        KeysAction::List => {
            let reports = app.credentials.credential_status().await?;
            let now = app.credentials.now();
            emit(cli, &reports, |f| f.format_credentials(&reports, now))
        }
        KeysAction::Sync => {
            let synced = app.sync_credentials().await?;
            emit(cli, &synced, |f| f.format_synced(&synced))
        }
        KeysAction::Enable { id } => {
            let credential = app.credentials.reactivate(*id).await?;
            info!(id = credential.id, label = %credential.label, "Credential re-enabled");
            emit(cli, &credential, |f| f.format_reactivated(&credential))
        }
        KeysAction::ResetQuota => {
            let reset = app.credentials.reset_daily_quota().await?;
            emit(cli, &json!({ "reset": reset }), |_| {
                format!("Reset daily usage of {reset} credentials")
            })
        }
    }
}
