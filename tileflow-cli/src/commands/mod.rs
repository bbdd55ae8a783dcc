//! CLI subcommands.

pub mod common;
pub mod detect;
pub mod status;
pub mod tiles;
