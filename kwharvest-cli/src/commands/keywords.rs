//! Keywords command - list harvested keywords with their latest counts.

use anyhow::Result;
use clap::Args;
use kwharvest_core::{CountRange, KeywordQuery, KeywordStatus, KeywordStore, SortKey};

use crate::Cli;
use crate::context::App;
use crate::output::emit;

/// Arguments for the keywords command.
#[derive(Args)]
pub struct KeywordsArgs {
    /// Only terms containing this text.
    #[arg(long = "query", short = 'Q')]
    pub search: Option<String>,

    /// Only keywords in this state (queued, fetched_rel, counted_docs, error).
    #[arg(long, value_parser = parse_status)]
    pub status: Option<KeywordStatus>,

    /// Include keywords with a search volume below 500.
    #[arg(long)]
    pub show_low_volume: bool,

    /// Include keywords without any counted documents.
    #[arg(long)]
    pub show_zero_docs: bool,

    /// Include everything (same as both --show-* flags).
    #[arg(long, short)]
    pub all: bool,

    /// Search volume range, e.g. `1000..` or `500..5000`.
    #[arg(long, value_parser = parse_range)]
    pub volume: Option<CountRange>,

    /// Blog count range.
    #[arg(long, value_parser = parse_range)]
    pub blog: Option<CountRange>,

    /// Cafe count range.
    #[arg(long, value_parser = parse_range)]
    pub cafe: Option<CountRange>,

    /// Web count range.
    #[arg(long, value_parser = parse_range)]
    pub web: Option<CountRange>,

    /// News count range.
    #[arg(long, value_parser = parse_range)]
    pub news: Option<CountRange>,

    /// Sort clauses, e.g. `cafe:asc,volume:desc` (the default).
    #[arg(long, value_delimiter = ',', value_parser = parse_sort_key)]
    pub sort: Vec<SortKey>,

    /// Rows per page (at most 1000).
    #[arg(long, short, default_value_t = 50)]
    pub limit: usize,

    /// Rows to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

impl KeywordsArgs {
    /// Builds the store query these arguments describe.
    pub fn query(&self) -> KeywordQuery {
        let mut query = KeywordQuery {
            search: self.search.clone(),
            status: self.status,
            hide_low_volume: !(self.all || self.show_low_volume),
            hide_zero_docs: !(self.all || self.show_zero_docs),
            limit: self.limit,
            offset: self.offset,
            ..KeywordQuery::default()
        };
        for (target, range) in [
            (&mut query.volume, self.volume),
            (&mut query.blog, self.blog),
            (&mut query.cafe, self.cafe),
            (&mut query.web, self.web),
            (&mut query.news, self.news),
        ] {
            if let Some(range) = range {
                *target = range;
            }
        }
        if !self.sort.is_empty() {
            query.sort.clone_from(&self.sort);
        }
        query
    }
}

fn parse_status(raw: &str) -> Result<KeywordStatus, String> {
    raw.parse::<KeywordStatus>().map_err(|e| format!("{e}"))
}

fn parse_range(raw: &str) -> Result<CountRange, String> {
    raw.parse::<CountRange>().map_err(|e| format!("{e}"))
}

fn parse_sort_key(raw: &str) -> Result<SortKey, String> {
    raw.parse::<SortKey>().map_err(|e| format!("{e}"))
}

/// Runs the keywords command.
pub async fn run(args: &KeywordsArgs, cli: &Cli) -> Result<()> {
    let app = App::open(cli)?;
    let page = app.store.list_keywords(&args.query()).await?;

    emit(cli, &page, |f| f.format_keywords(&page))
}
