//! CLI subcommand implementations.

pub mod logs;
pub mod stats;
pub mod user;
