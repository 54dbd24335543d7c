//! Upstream CLI - Main entry point

use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use upstream_cli::commands::publish::PublishInput;
use upstream_cli::commands::upload::StationFiles;
use upstream_cli::{Cli, Commands, Config, ConfigCommand, DatasetCommand};
use upstream_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // .env values never override variables already set
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbose flag and environment
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("upstream-cli".to_string())
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging, so a failed init is not fatal
    let guard = init_logging(&log_config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight chunks and skipping the rest");
            eprintln!("Interrupted: waiting for in-flight requests to finish...");
            on_signal.cancel();
        }
    });

    if let Err(e) = execute_command(&cli, cancel).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        // process::exit skips destructors; flush file logs first
        drop(guard);
        process::exit(e.exit_code());
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli, cancel: CancellationToken) -> upstream_cli::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Validate {
            sensors,
            measurements,
            chunk_size,
        } => upstream_cli::commands::validate::run(&config, sensors, measurements, *chunk_size).await,
        Commands::Upload {
            campaign_id,
            station_id,
            sensors,
            measurements,
            upload,
            json,
        } => {
            let files = StationFiles {
                campaign_id,
                station_id,
                sensors,
                measurements,
            };
            upstream_cli::commands::upload::run(&config, files, upload, *json, cancel).await
        },
        Commands::Publish {
            campaign_id,
            sensors,
            measurements,
            station,
            metadata,
            upload,
            upload_args,
            json,
        } => {
            let input = PublishInput {
                campaign_id,
                sensors,
                measurements,
                station,
                metadata,
            };
            let upload = upload.then_some(upload_args);
            upstream_cli::commands::publish::run(&config, input, upload, *json, cancel).await
        },
        Commands::Dataset(command) => match command {
            DatasetCommand::Show { name, json } => upstream_cli::commands::dataset::show(&config, name, *json).await,
            DatasetCommand::Delete { name } => upstream_cli::commands::dataset::delete(&config, name).await,
            DatasetCommand::Search {
                query,
                organization,
                tags,
                limit,
            } => {
                upstream_cli::commands::dataset::search(
                    &config,
                    query.clone(),
                    organization.clone(),
                    tags.clone(),
                    *limit,
                )
                .await
            },
            DatasetCommand::Organizations { name } => {
                upstream_cli::commands::dataset::organizations(&config, name.as_deref()).await
            },
        },
        Commands::Config(command) => match command {
            ConfigCommand::Show => upstream_cli::commands::config::show(&config).await,
        },
    }
}
