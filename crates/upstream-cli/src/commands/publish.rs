//! `upstream publish` command implementation
//!
//! Publishes a station's files as resources of the campaign's CKAN dataset,
//! optionally uploading the measurements to the platform first.

use crate::commands::ckan_client;
use crate::commands::upload::{print_summary, upload_station, StationFiles};
use crate::config::Config;
use crate::error::Result;
use crate::frame;
use crate::progress::create_spinner;
use crate::publish::{PublishRequest, PublishResult, Publisher, ResourceFile};
use crate::{MetadataArgs, StationArgs, UploadArgs};
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use upstream_common::types::{format_extra_timestamp, DatasetPatch, SensorDefinition};
use upstream_common::UpstreamError;

/// Tags every campaign dataset carries
pub const DEFAULT_TAGS: [&str; 3] = ["environmental", "sensors", "upstream"];

const SOURCE: &str = "Upstream Platform";
const DATA_TYPE: &str = "environmental_sensor_data";

/// Catalog name of a campaign's dataset
pub fn dataset_slug(campaign_id: &str) -> String {
    format!("upstream-campaign-{}", campaign_id.trim().to_lowercase())
}

/// Everything the publish command was given
#[derive(Debug, Clone)]
pub struct PublishInput<'a> {
    pub campaign_id: &'a str,
    pub sensors: &'a Path,
    pub measurements: &'a Path,
    pub station: &'a StationArgs,
    pub metadata: &'a MetadataArgs,
}

pub async fn run(
    config: &Config,
    input: PublishInput<'_>,
    upload: Option<&UploadArgs>,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    // Fail on bad files before touching either server
    let station = frame::read_files(input.sensors, input.measurements)?;
    let client = ckan_client(config)?;

    if let Some(args) = upload {
        let files = StationFiles {
            campaign_id: input.campaign_id,
            station_id: &input.station.station_id,
            sensors: input.sensors,
            measurements: input.measurements,
        };
        let summary = upload_station(config, files, args, cancel, !json).await?;
        if !json {
            print_summary(&summary);
            println!();
        }
    }

    let request = build_request(
        &input,
        &station.sensors,
        std::fs::read(input.sensors)?,
        std::fs::read(input.measurements)?,
        Utc::now(),
    )?;

    let publisher = Publisher::new(client, config.ckan.publish_settings());
    let spinner = (!json).then(|| create_spinner(&format!("Publishing {}", request.dataset_slug)));
    let result = publisher.publish(request).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if result.is_partial() {
        let names: Vec<&str> = result.resource_failures.iter().map(|f| f.name.as_str()).collect();
        return Err(UpstreamError::api(
            None,
            format!(
                "dataset '{}' was updated but {} resource(s) failed to upload: {}",
                result.dataset_slug,
                names.len(),
                names.join("; ")
            ),
        )
        .into());
    }

    Ok(())
}

/// Assemble the dataset patch, resources, and station metadata
pub fn build_request(
    input: &PublishInput<'_>,
    sensors: &[SensorDefinition],
    sensors_csv: Vec<u8>,
    measurements_csv: Vec<u8>,
    now: DateTime<Utc>,
) -> Result<PublishRequest> {
    let metadata = input.metadata;
    let campaign_id = input.campaign_id.trim();
    let station_name = input
        .station
        .station_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| input.station.station_id.clone());

    let mut patch = DatasetPatch::new(metadata.mode.into())
        .with_tags(DEFAULT_TAGS)
        .with_tags(&metadata.tags)
        .with_extra("source", SOURCE)
        .with_extra("data_type", DATA_TYPE)
        .with_extra("campaign_id", campaign_id);
    if let Some(name) = &metadata.campaign_name {
        patch = patch.with_extra("campaign_name", name.clone());
    }
    let campaign_fields = [
        ("campaign_description", &metadata.description),
        ("campaign_contact_name", &metadata.contact_name),
        ("campaign_contact_email", &metadata.contact_email),
        ("campaign_allocation", &metadata.allocation),
    ];
    for (key, value) in campaign_fields {
        if let Some(value) = value {
            patch = patch.with_extra(key, value.clone());
        }
    }
    for (key, value) in &metadata.extras {
        patch = patch.with_extra(key.clone(), value.clone());
    }
    if let Some(title) = &metadata.title {
        patch = patch.with_title(title.clone());
    }

    let published_at = format_extra_timestamp(&now);

    Ok(PublishRequest {
        dataset_slug: dataset_slug(campaign_id),
        default_title: metadata
            .campaign_name
            .clone()
            .unwrap_or_else(|| format!("Upstream Campaign {}", campaign_id)),
        description: metadata.description.clone(),
        sensors: ResourceFile {
            name: format!("{} - Sensors Configuration - {}", station_name, published_at),
            description: "Sensor configuration and metadata".to_string(),
            file_name: file_name_of(input.sensors, "sensors.csv"),
            content: sensors_csv,
        },
        measurements: ResourceFile {
            name: format!("{} - Measurement Data - {}", station_name, published_at),
            description: "Environmental sensor measurements".to_string(),
            file_name: file_name_of(input.measurements, "measurements.csv"),
            content: measurements_csv,
        },
        resource_metadata: station_metadata(input.station, &station_name, sensors)?,
        patch,
    })
}

/// Station fields set on both resources
fn station_metadata(
    station: &StationArgs,
    station_name: &str,
    sensors: &[SensorDefinition],
) -> Result<BTreeMap<String, String>> {
    let aliases: Vec<&str> = sensors.iter().map(|s| s.alias.as_str()).collect();
    let units: Vec<&str> = sensors.iter().map(|s| s.units.as_str()).collect();
    let variables: Vec<&str> = sensors.iter().map(|s| s.variable_name.as_str()).collect();
    let descriptions: Vec<Option<&str>> = sensors.iter().map(|s| s.description.as_deref()).collect();

    let mut metadata = BTreeMap::from([
        ("station_id".to_string(), station.station_id.clone()),
        ("station_name".to_string(), station_name.to_string()),
        ("station_sensors".to_string(), serde_json::to_string(sensors)?),
        ("station_sensors_count".to_string(), sensors.len().to_string()),
        ("station_sensors_aliases".to_string(), serde_json::to_string(&aliases)?),
        ("station_sensors_units".to_string(), serde_json::to_string(&units)?),
        ("station_sensors_descriptions".to_string(), serde_json::to_string(&descriptions)?),
        ("station_sensors_variablename".to_string(), serde_json::to_string(&variables)?),
    ]);

    let optional = [
        ("station_description", &station.station_description),
        ("station_contact_name", &station.station_contact_name),
        ("station_contact_email", &station.station_contact_email),
    ];
    for (key, value) in optional {
        if let Some(value) = value.as_ref().filter(|v| !v.trim().is_empty()) {
            metadata.insert(key.to_string(), value.clone());
        }
    }

    Ok(metadata)
}

fn file_name_of(path: &Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

fn print_result(result: &PublishResult) {
    let headline = if result.is_partial() {
        format!("⚠ Published {} with resource failures", result.dataset_slug)
            .as_str()
            .yellow()
    } else {
        format!("✓ Published {}", result.dataset_slug).as_str().green()
    };
    println!("{}", headline.bold());
    println!();
    println!("  {:<12} {}", "URL:", result.dataset_url);
    println!("  {:<12} {:?}", "State:", result.state);
    println!("  {:<12} {}", "Mode:", result.mode);
    println!("  {:<12} {}", "Resources:", result.resources_updated.len());
    println!("  {:<12} {}", "Visibility:", if result.public { "public" } else { "private" });
    for failure in &result.resource_failures {
        println!("  {} {}: {}", "✗".red(), failure.name, failure.error);
    }
}
