//! Upstream CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves environmental sensor data from local CSV files into the Upstream
//! sensor-data platform and publishes the resulting dataset to a CKAN catalog.
//!
//! # Overview
//!
//! - **Validation**: Parse and chunk CSV files offline (`upstream validate`)
//! - **Upload**: Chunked, retried, bounded-parallel upload (`upstream upload`)
//! - **Publishing**: Create or reconcile a CKAN dataset and attach files (`upstream publish`)
//! - **Catalog**: Inspect, search, and delete datasets (`upstream dataset`)
//! - **Configuration**: Show effective settings (`upstream config show`)
//!
//! # Pipeline
//!
//! ```text
//! frame (CSV reader) -> chunk (planner) -> upload (executor) -> publish -> ckan (reconciler + client)
//! ```

pub mod api;
pub mod chunk;
pub mod ckan;
pub mod commands;
pub mod config;
pub mod error;
pub mod frame;
pub mod progress;
pub mod publish;
pub mod retry;
pub mod transport;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use upstream_common::types::PatchMode;

/// Upstream - sensor data upload and CKAN publishing
#[derive(Parser, Debug)]
#[command(name = "upstream")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// YAML configuration file
    #[arg(short, long, env = "UPSTREAM_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check sensor and measurement files and show how they would be chunked
    Validate {
        /// Sensors CSV (alias,variablename,units,postprocess,postprocessscript)
        sensors: PathBuf,

        /// Measurements CSV (collectiontime,Lat_deg,Lon_deg,<aliases>...)
        measurements: PathBuf,

        /// Rows per chunk (overrides configuration)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Upload measurements to the platform in chunks
    Upload {
        /// Campaign ID
        campaign_id: String,

        /// Station ID
        station_id: String,

        /// Sensors CSV
        sensors: PathBuf,

        /// Measurements CSV
        measurements: PathBuf,

        #[command(flatten)]
        upload: UploadArgs,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Publish station files to CKAN, creating or updating the campaign dataset
    Publish {
        /// Campaign ID
        campaign_id: String,

        /// Sensors CSV
        sensors: PathBuf,

        /// Measurements CSV
        measurements: PathBuf,

        #[command(flatten)]
        station: StationArgs,

        #[command(flatten)]
        metadata: MetadataArgs,

        /// Upload measurements to the platform before publishing
        #[arg(long)]
        upload: bool,

        #[command(flatten)]
        upload_args: UploadArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage CKAN datasets
    #[command(subcommand)]
    Dataset(DatasetCommand),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Upload tuning shared by `upload` and `publish --upload`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct UploadArgs {
    /// Rows per chunk (overrides configuration)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Chunks uploaded concurrently (overrides configuration)
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Only send these chunk sequence indices, e.g. from a previous failure
    #[arg(long, value_delimiter = ',')]
    pub only_chunks: Vec<usize>,
}

/// Station the files belong to
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StationArgs {
    /// Station ID
    #[arg(long)]
    pub station_id: String,

    /// Station name used in resource names (defaults to the station ID)
    #[arg(long)]
    pub station_name: Option<String>,

    /// Station description recorded on the resources
    #[arg(long)]
    pub station_description: Option<String>,

    /// Station contact name
    #[arg(long)]
    pub station_contact_name: Option<String>,

    /// Station contact email
    #[arg(long)]
    pub station_contact_email: Option<String>,
}

/// Dataset metadata changes
#[derive(clap::Args, Debug, Clone, Default)]
pub struct MetadataArgs {
    /// How to combine with existing tags and extras
    #[arg(long, value_enum, default_value_t = ModeArg::Merge)]
    pub mode: ModeArg,

    /// Tag to add (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Extra metadata as key=value (repeatable)
    #[arg(long = "extra", value_parser = parse_key_value)]
    pub extras: Vec<(String, String)>,

    /// Dataset title
    #[arg(long)]
    pub title: Option<String>,

    /// Campaign name recorded in extras and used as the title of a new dataset
    #[arg(long)]
    pub campaign_name: Option<String>,

    /// Dataset description, used when the dataset is created
    #[arg(long)]
    pub description: Option<String>,

    /// Campaign contact name
    #[arg(long)]
    pub contact_name: Option<String>,

    /// Campaign contact email
    #[arg(long)]
    pub contact_email: Option<String>,

    /// Campaign compute allocation
    #[arg(long)]
    pub allocation: Option<String>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModeArg {
    #[default]
    Merge,
    Replace,
}

impl From<ModeArg> for PatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Merge => PatchMode::Merge,
            ModeArg::Replace => PatchMode::Replace,
        }
    }
}

/// Dataset subcommands
#[derive(Subcommand, Debug)]
pub enum DatasetCommand {
    /// Show a dataset
    Show {
        /// Dataset name or ID
        name: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a dataset
    Delete {
        /// Dataset name or ID
        name: String,
    },

    /// Search datasets
    Search {
        /// Free-text query
        query: Option<String>,

        /// Filter by organization
        #[arg(long)]
        organization: Option<String>,

        /// Filter by tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Maximum number of results
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// List organizations, or show one in detail
    Organizations {
        /// Organization name or ID
        name: Option<String>,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
