//! CLI module for toolmux.

pub mod commands;

pub use commands::{Cli, Commands};
