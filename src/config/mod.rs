//! Configuration for the toolmux binary.
//!
//! One YAML file with `router`, `fetch`, `backends` and `reasoner` sections.

pub use self::global::ToolmuxConfig;

mod global;

pub type Config = ToolmuxConfig;
