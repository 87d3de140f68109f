use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::{Configuration, SqlDialect};
use querier::executor::DataFusionExecutor;
use querier::http::{self, AppState};
use querier::query::dialect::dialect_for;
use querier::query::{DataFormat, QueryModel, QueryRequest, TimeRange};

#[derive(Parser)]
#[command(name = "sqlseries")]
#[command(about = "sqlseries - time-series queries over SQL with Grafana-style macros")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<SqlSeriesCommands>,
}

#[derive(Subcommand)]
enum SqlSeriesCommands {
    /// Expand the macros of a query and print the resulting SQL
    Expand(ExpandArgs),
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for SqlSeriesCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Serve)
    }
}

#[derive(Args)]
struct ExpandArgs {
    /// Raw query text
    #[arg(long)]
    query: String,

    /// Range start (RFC 3339), defaults to six hours before the end
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// Range end (RFC 3339), defaults to now
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    /// Requested interval, replaced by the bucket width of $__timeGroup
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Overrides the configured dialect
    #[arg(long, value_enum)]
    dialect: Option<SqlDialect>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command.unwrap_or_default() {
        SqlSeriesCommands::Expand(args) => expand(&args, &config),
        SqlSeriesCommands::Common(command) => {
            if utils::handle_common_command(&command, &config)? {
                return Ok(());
            }
            serve(config).await
        }
    }
}

fn expand(args: &ExpandArgs, config: &Configuration) -> Result<()> {
    let to = args.to.unwrap_or_else(Utc::now);
    let from = args.from.unwrap_or(to - chrono::Duration::hours(6));
    let dialect = args.dialect.unwrap_or(config.query.dialect);

    let request = QueryRequest {
        ref_id: "A".to_string(),
        raw: args.query.clone(),
        range: TimeRange::new(from, to),
        interval: args.interval,
        format: DataFormat::Timeseries,
    };
    let model = QueryModel::build(&request, dialect_for(dialect))
        .context("Failed to expand query macros")?;

    println!("{}", model.sql());

    let context = model.context();
    println!(
        "-- interval: {}",
        humantime::format_duration(context.interval)
    );
    match &context.fill {
        Some(fill) => println!("-- fill: {fill:?}"),
        None => println!("-- fill: none"),
    }

    Ok(())
}

async fn serve(config: Configuration) -> Result<()> {
    utils::validate_config(&config)?;

    log::info!("Loaded configuration:");
    log::info!("  Listen address: {}", config.server.addr);
    log::info!("  SQL dialect: {:?}", config.query.dialect);
    log::info!("  Tables: {}", config.tables.len());

    let executor = DataFusionExecutor::with_tables(&config.tables)
        .await
        .context("Failed to register tables")?;

    let state = AppState::new(
        Arc::new(executor),
        dialect_for(config.query.dialect),
        config.query.timeout,
    );

    http::serve(&config.server.addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {e}");
        }
    })
    .await
}
