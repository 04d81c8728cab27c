use clap::Parser;
use livescore::cli::{Cli, Commands};
use livescore::config::AppConfig;
use std::process::ExitCode;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, run_orchestrator};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load_from(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", cli.config_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.resolved_command() {
        Commands::CheckConfig => {
            init_logging_simple();
            match config.validate() {
                Ok(()) => {
                    println!("Configuration OK");
                    println!("  feed:       {}", config.feed.base_url);
                    println!(
                        "  store:      {}",
                        if config.database.in_memory {
                            "in-memory"
                        } else {
                            "postgres"
                        }
                    );
                    println!(
                        "  lease:      {}s (re-poll {:?})",
                        config.leader.lease_duration_secs,
                        config.leader.repoll_interval()
                    );
                    println!("  cycle:      {}s", config.scheduler.cycle_interval_secs);
                    println!("  quarantine: {}s", config.lifecycle.quarantine_period_secs);
                    ExitCode::SUCCESS
                }
                Err(errors) => {
                    for e in errors {
                        eprintln!("  - {}", e);
                    }
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Run {
            api_port,
            in_memory,
        } => {
            if api_port.is_some() {
                config.api_port = api_port;
            }
            if in_memory {
                config.database.in_memory = true;
            }

            init_logging(&config.logging);
            match run_orchestrator(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!("Fatal: {:#}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
