//! CLI command definitions using clap.
//!
//! - serve: run the router
//! - backend: run a built-in data source as a tool server
//! - catalog / call: talk to a running router
//! - chat: interactive agent over the router's tools

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use toolmux::sources::SourceKind;

/// Toolmux - one tool catalog over many tool servers
#[derive(Parser, Debug)]
#[command(name = "toolmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the router over the configured backends
    Serve {
        /// Address to listen on (overrides config)
        #[arg(short, long, conflicts_with = "stdio")]
        listen: Option<String>,

        /// Serve a single client on stdin/stdout
        #[arg(long)]
        stdio: bool,
    },

    /// Run a built-in data source as a standalone tool server
    Backend {
        source: SourceKind,

        /// Listen on TCP instead of stdin/stdout
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Print the merged tool catalog of a running router
    Catalog {
        /// Router address (defaults to the configured listen address)
        #[arg(short, long)]
        router: Option<String>,
    },

    /// Invoke one tool through a running router
    Call {
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        #[arg(short, long)]
        router: Option<String>,
    },

    /// Chat with a reasoner that can use the router's tools
    Chat {
        #[arg(short, long)]
        router: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["toolmux"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["toolmux", "catalog", "-v", "-c", "/tmp/toolmux.yml"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/toolmux.yml")));
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["toolmux", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { listen, stdio } => {
                assert!(listen.is_none());
                assert!(!stdio);
            }
            _ => panic!("Expected serve command"),
        }
    }

    #[test]
    fn test_serve_listen_conflicts_with_stdio() {
        assert!(Cli::try_parse_from(["toolmux", "serve", "--stdio", "--listen", "127.0.0.1:1"]).is_err());
    }

    #[test]
    fn test_backend_source() {
        let cli = Cli::try_parse_from(["toolmux", "backend", "pubmed", "--listen", "127.0.0.1:4000"]).unwrap();
        match cli.command {
            Commands::Backend { source, listen } => {
                assert_eq!(source, SourceKind::Pubmed);
                assert_eq!(listen.as_deref(), Some("127.0.0.1:4000"));
            }
            _ => panic!("Expected backend command"),
        }
        assert!(Cli::try_parse_from(["toolmux", "backend", "weather"]).is_err());
    }

    #[test]
    fn test_call_args() {
        let cli = Cli::try_parse_from([
            "toolmux",
            "call",
            "get_icd10_code_basic",
            "--args",
            r#"{"query":"asthma"}"#,
            "--router",
            "127.0.0.1:3000",
        ])
        .unwrap();
        match cli.command {
            Commands::Call { tool, args, router } => {
                assert_eq!(tool, "get_icd10_code_basic");
                assert_eq!(args, r#"{"query":"asthma"}"#);
                assert_eq!(router.as_deref(), Some("127.0.0.1:3000"));
            }
            _ => panic!("Expected call command"),
        }
    }

    #[test]
    fn test_call_default_args() {
        let cli = Cli::try_parse_from(["toolmux", "call", "x"]).unwrap();
        assert!(matches!(cli.command, Commands::Call { ref args, .. } if args == "{}"));
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
