use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments shared by every subcommand
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands shared by every binary
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Serve the query API (default behavior)
    #[default]
    Serve,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use std::collections::HashSet;
    use tracing_subscriber::EnvFilter;

    fn default_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments; `RUST_LOG` wins when set
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("sqlseries Configuration:");
            println!("========================");
            println!("Listen address: {}", config.server.addr);
            println!("SQL dialect: {:?}", config.query.dialect);
            println!(
                "Query timeout: {}",
                humantime::format_duration(config.query.timeout)
            );

            if config.tables.is_empty() {
                println!("Tables: none");
            } else {
                println!("Tables:");
                for table in &config.tables {
                    println!("  {} ({:?}): {}", table.name, table.format, table.path);
                }
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.server.addr.is_empty() {
            anyhow::bail!("Listen address cannot be empty");
        }

        if config.query.timeout.is_zero() {
            anyhow::bail!("Query timeout must be greater than zero");
        }

        let mut names = HashSet::new();
        for table in &config.tables {
            if table.name.is_empty() {
                anyhow::bail!("Table name cannot be empty");
            }
            if table.path.is_empty() {
                anyhow::bail!("Path of table '{}' cannot be empty", table.name);
            }
            if !names.insert(table.name.as_str()) {
                anyhow::bail!("Table '{}' is configured more than once", table.name);
            }
        }

        log::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting services
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Serve => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
