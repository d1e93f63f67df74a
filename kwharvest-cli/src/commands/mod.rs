//! CLI command implementations.

pub mod collect;
pub mod enqueue;
pub mod keys;
pub mod keywords;
pub mod run;
pub mod seed;
pub mod status;
