//! Output formatting for CLI.

mod json;
mod text;

pub use json::JsonFormatter;
pub use text::TextFormatter;

use std::io::IsTerminal;

use anyhow::Result;
use serde::Serialize;

use crate::{Cli, OutputFormat};

/// Prints `value` as JSON, or the text rendering produced by `text`.
pub fn emit<T, F>(cli: &Cli, value: &T, text: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&TextFormatter) -> String,
{
    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(std::io::stdout().is_terminal());
            println!("{}", text(&formatter));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(value)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
