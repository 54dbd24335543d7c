//! CSV frame reader
//!
//! Parses a station's sensors file and measurements file into validated
//! records. Reading is all-or-nothing: the first malformed line fails the
//! whole read and no rows are returned.
//!
//! Sensors header: `alias,variablename,units,postprocess,postprocessscript`,
//! optionally followed by `description`
//!
//! Measurements header: `collectiontime,Lat_deg,Lon_deg,<alias>,<alias>,...`

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use upstream_common::types::measurement::{
    COLLECTION_TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN, MEASUREMENT_BASE_COLUMNS,
};
use upstream_common::types::{MeasurementFrame, MeasurementRow, SensorDefinition};
use upstream_common::{Result, UpstreamError};

/// Sensor columns that must be present
const REQUIRED_SENSOR_COLUMNS: [&str; 3] = ["alias", "variablename", "units"];

/// ISO-8601 basic offsets (`+0000`), which RFC 3339 parsing rejects
const OFFSET_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Naive timestamp layouts accepted in `collectiontime`, read as UTC
const NAIVE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Sensors and measurements of one station, ready to chunk
#[derive(Debug, Clone)]
pub struct StationData {
    pub sensors: Vec<SensorDefinition>,
    pub frame: MeasurementFrame,
}

/// Read both files of a station from disk
pub fn read_files(sensors_path: &Path, measurements_path: &Path) -> Result<StationData> {
    let sensors = read_sensors(open(sensors_path)?)?;
    let frame = read_measurements(open(measurements_path)?, &sensors)?;

    tracing::debug!(
        sensors = sensors.len(),
        rows = frame.len(),
        measurements = %measurements_path.display(),
        "Read station CSV files"
    );

    Ok(StationData { sensors, frame })
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        UpstreamError::validation(format!("cannot open '{}': {}", path.display(), e))
    })
}

/// Parse a sensors file
pub fn read_sensors<R: Read>(input: R) -> Result<Vec<SensorDefinition>> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(input);
    let headers = reader.headers().map_err(csv_error)?.clone();

    for column in REQUIRED_SENSOR_COLUMNS {
        if column_index(&headers, column).is_none() {
            return Err(UpstreamError::invalid_field(
                column,
                "required column missing from sensors file",
            ));
        }
    }

    let alias_col = column_index(&headers, "alias");
    let variable_col = column_index(&headers, "variablename");
    let units_col = column_index(&headers, "units");
    let postprocess_col = column_index(&headers, "postprocess");
    let script_col = column_index(&headers, "postprocessscript");
    let description_col = column_index(&headers, "description");

    let mut sensors = Vec::new();
    let mut seen = HashSet::new();

    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let line = line_of(&record);
        let cell = |index: Option<usize>| index.and_then(|i| record.get(i)).unwrap_or("");

        let postprocess = parse_flag(cell(postprocess_col)).ok_or_else(|| {
            UpstreamError::invalid_field(
                "postprocess",
                format!("line {}: '{}' is not a boolean", line, cell(postprocess_col)),
            )
        })?;
        let script = Some(cell(script_col).to_string());

        let sensor = SensorDefinition::new(cell(alias_col), cell(variable_col), cell(units_col))
            .map_err(|e| at_line(e, line))?
            .with_postprocess(postprocess, script)
            .with_description(Some(cell(description_col).to_string()));

        if !seen.insert(sensor.alias.clone()) {
            return Err(UpstreamError::invalid_field(
                "alias",
                format!("line {}: sensor alias '{}' is declared twice", line, sensor.alias),
            ));
        }
        sensors.push(sensor);
    }

    Ok(sensors)
}

/// Parse a measurements file against the station's sensors.
///
/// Every column after the three base columns must name a declared sensor
/// alias. Empty value cells are absent readings.
pub fn read_measurements<R: Read>(input: R, sensors: &[SensorDefinition]) -> Result<MeasurementFrame> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(input);
    let headers = reader.headers().map_err(csv_error)?.clone();

    for column in MEASUREMENT_BASE_COLUMNS {
        if column_index(&headers, column).is_none() {
            return Err(UpstreamError::invalid_field(
                column,
                "required column missing from measurements file",
            ));
        }
    }

    let time_col = column_index(&headers, COLLECTION_TIME_COLUMN);
    let lat_col = column_index(&headers, LATITUDE_COLUMN);
    let lon_col = column_index(&headers, LONGITUDE_COLUMN);

    let known: HashSet<&str> = sensors.iter().map(|s| s.alias.as_str()).collect();
    let value_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| !MEASUREMENT_BASE_COLUMNS.contains(name))
        .map(|(i, name)| (i, name.to_string()))
        .collect();

    if let Some((_, unknown)) = value_columns.iter().find(|(_, name)| !known.contains(name.as_str())) {
        return Err(UpstreamError::invalid_field(
            unknown.clone(),
            "measurement column does not match any sensor alias",
        ));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let line = line_of(&record);
        let cell = |index: Option<usize>| index.and_then(|i| record.get(i)).unwrap_or("");

        let raw_time = cell(time_col);
        let collection_time = parse_collection_time(raw_time).ok_or_else(|| {
            UpstreamError::invalid_field(
                COLLECTION_TIME_COLUMN,
                format!("line {}: '{}' is not an ISO-8601 timestamp", line, raw_time),
            )
        })?;
        let latitude = parse_number(cell(lat_col), LATITUDE_COLUMN, line)?
            .ok_or_else(|| missing(LATITUDE_COLUMN, line))?;
        let longitude = parse_number(cell(lon_col), LONGITUDE_COLUMN, line)?
            .ok_or_else(|| missing(LONGITUDE_COLUMN, line))?;

        let values = value_columns
            .iter()
            .map(|(index, alias)| parse_number(cell(Some(*index)), alias, line))
            .collect::<Result<Vec<_>>>()?;

        let row = MeasurementRow::new(collection_time, latitude, longitude, values)
            .map_err(|e| at_line(e, line))?;
        rows.push(row);
    }

    let aliases = value_columns.into_iter().map(|(_, alias)| alias).collect();
    MeasurementFrame::new(aliases, rows)
}

/// Parse an ISO-8601 timestamp; naive values are taken as UTC
pub fn parse_collection_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }
    if let Some(time) = OFFSET_TIME_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(raw, format).ok())
    {
        return Some(time.with_timezone(&Utc));
    }

    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn parse_number(raw: &str, column: &str, line: u64) -> Result<Option<f64>> {
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(UpstreamError::invalid_field(
            column,
            format!("line {}: '{}' is not a number", line, raw),
        )),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn missing(column: &str, line: u64) -> UpstreamError {
    UpstreamError::invalid_field(column, format!("line {}: value is required", line))
}

fn at_line(err: UpstreamError, line: u64) -> UpstreamError {
    match err {
        UpstreamError::Validation { field, message } => UpstreamError::Validation {
            field,
            message: format!("line {}: {}", line, message),
        },
        other => other,
    }
}

fn csv_error(err: csv::Error) -> UpstreamError {
    let line = err.position().map(|p| p.line());
    match line {
        Some(line) => UpstreamError::validation(format!("line {}: {}", line, err)),
        None => UpstreamError::validation(format!("malformed CSV: {}", err)),
    }
}
