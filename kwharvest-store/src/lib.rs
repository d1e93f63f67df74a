// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # kwharvest Store
//!
//! Durable state and configuration for kwharvest.
//!
//! - **SqliteStore**: the production record store (credentials, jobs, keywords)
//! - **MemoryStore**: the same contract in process memory
//! - **Config**: JSON configuration with per-section defaults
//! - **Persistence**: default paths and JSON file helpers
//!
//! ## Usage
//!
//! ```ignore
//! use kwharvest_store::{Config, SqliteStore};
//!
//! let mut config = Config::load()?;
//! config.merge_env_credentials();
//! config.validate()?;
//!
//! let store = SqliteStore::open(&config.database.resolved_path())?;
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod persistence;
pub mod sqlite;

pub use config::{
    parse_key_list, CooldownConfig, Config, CredentialConfig, DatabaseConfig, GlobalSlotsConfig,
    KeyEntry, QueueConfig, RateLimitConfig, RetryConfig, TokenBucketConfig, OPENAPI_KEYS_ENV,
    SEARCHAD_KEYS_ENV,
};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use persistence::{
    default_config_dir, default_config_path, default_data_dir, default_database_path,
    ensure_parent_dir, read_json, write_json,
};
pub use sqlite::SqliteStore;
#[cfg(test)]
mod persistence_tests;
