pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "A Microsub feed aggregation server", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server and the refresh scheduler
    Serve {
        /// Address to bind, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Poll every followed feed once
    Refresh,
    /// Fetch and normalize a URL without storing anything
    Preview {
        /// URL of the page or feed
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_config_flag() {
        let cli = Cli::try_parse_from(["tributary", "preview", "https://example.com/", "--config", "/tmp/t.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));
        assert!(matches!(cli.command, Commands::Preview { ref url } if url == "https://example.com/"));
    }

    #[test]
    fn test_serve_bind_override() {
        let cli = Cli::try_parse_from(["tributary", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { bind: Some(ref b) } if b == "0.0.0.0:9000"));
    }
}
