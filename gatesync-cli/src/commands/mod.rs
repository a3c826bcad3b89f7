//! Subcommand implementations.

pub mod migrate;
pub mod report;
pub mod serve;
pub mod sync;
pub mod tier;
