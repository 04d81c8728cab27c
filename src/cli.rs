use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "livescore")]
#[command(version)]
#[command(about = "Live event orchestrator: leader-elected feed polling, lifecycle and stall alerts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config", env = "LIVESCORE_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the orchestrator (default)
    Run {
        /// Override the read API port
        #[arg(long)]
        api_port: Option<u16>,

        /// Keep state in process memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },

    /// Load and validate configuration, then exit
    CheckConfig,
}

impl Cli {
    /// Subcommand to execute, `run` when none was given
    pub fn resolved_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run {
            api_port: None,
            in_memory: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::parse_from(["livescore"]);
        assert!(matches!(
            cli.resolved_command(),
            Commands::Run {
                api_port: None,
                in_memory: false
            }
        ));
        assert_eq!(cli.config_dir, PathBuf::from("config"));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from(["livescore", "run", "--api-port", "9000", "--in-memory"]);
        assert!(matches!(
            cli.resolved_command(),
            Commands::Run {
                api_port: Some(9000),
                in_memory: true
            }
        ));
    }
}
