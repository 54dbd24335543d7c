//! Sensor definitions and measurement rows
//!
//! Rows are validated when constructed and are immutable afterwards. A
//! [`MeasurementFrame`] ties a set of rows to the ordered sensor aliases
//! their values belong to.

use crate::error::{Result, UpstreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Column holding the ISO-8601 collection timestamp
pub const COLLECTION_TIME_COLUMN: &str = "collectiontime";

/// Column holding latitude in decimal degrees
pub const LATITUDE_COLUMN: &str = "Lat_deg";

/// Column holding longitude in decimal degrees
pub const LONGITUDE_COLUMN: &str = "Lon_deg";

/// Fixed leading columns of every measurements file, in order
pub const MEASUREMENT_BASE_COLUMNS: [&str; 3] =
    [COLLECTION_TIME_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN];

/// Header of a sensors file, in order
pub const SENSOR_COLUMNS: [&str; 5] = [
    "alias",
    "variablename",
    "units",
    "postprocess",
    "postprocessscript",
];

/// One sensor of a station, as declared in the sensors file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDefinition {
    /// Unique within a station; names a measurement column
    pub alias: String,

    /// Measured variable (e.g. "Air Temperature")
    pub variable_name: String,

    /// Units of the variable (e.g. "°C")
    pub units: String,

    /// Whether the platform should post-process readings
    #[serde(default)]
    pub postprocess: bool,

    /// Post-processing script name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postprocess_script: Option<String>,

    /// Free-text description from an optional `description` column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SensorDefinition {
    pub fn new(
        alias: impl Into<String>,
        variable_name: impl Into<String>,
        units: impl Into<String>,
    ) -> Result<Self> {
        let sensor = Self {
            alias: alias.into().trim().to_string(),
            variable_name: variable_name.into().trim().to_string(),
            units: units.into().trim().to_string(),
            postprocess: false,
            postprocess_script: None,
            description: None,
        };

        if sensor.alias.is_empty() {
            return Err(UpstreamError::invalid_field("alias", "sensor alias cannot be empty"));
        }
        if sensor.variable_name.is_empty() {
            return Err(UpstreamError::invalid_field(
                "variablename",
                format!("sensor '{}' has no variable name", sensor.alias),
            ));
        }
        if sensor.units.is_empty() {
            return Err(UpstreamError::invalid_field(
                "units",
                format!("sensor '{}' has no units", sensor.alias),
            ));
        }

        Ok(sensor)
    }

    pub fn with_postprocess(mut self, enabled: bool, script: Option<String>) -> Self {
        self.postprocess = enabled;
        self.postprocess_script = script.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }
}

/// One line of a measurements file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRow {
    collection_time: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    values: Vec<Option<f64>>,
}

impl MeasurementRow {
    /// Build a row, checking coordinate ranges.
    ///
    /// `values` are positional and must line up with the aliases of the
    /// frame the row is placed in. `None` is an empty cell.
    pub fn new(
        collection_time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        values: Vec<Option<f64>>,
    ) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(UpstreamError::invalid_field(
                LATITUDE_COLUMN,
                format!("latitude {} is outside [-90, 90]", latitude),
            ));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(UpstreamError::invalid_field(
                LONGITUDE_COLUMN,
                format!("longitude {} is outside [-180, 180]", longitude),
            ));
        }

        Ok(Self {
            collection_time,
            latitude,
            longitude,
            values,
        })
    }

    pub fn collection_time(&self) -> DateTime<Utc> {
        self.collection_time
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Sensor readings in frame alias order
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }
}

/// Measurement rows together with the sensor aliases naming their value columns
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementFrame {
    aliases: Arc<[String]>,
    rows: Vec<MeasurementRow>,
}

impl MeasurementFrame {
    pub fn new(aliases: Vec<String>, rows: Vec<MeasurementRow>) -> Result<Self> {
        let mut seen = HashSet::new();
        for alias in &aliases {
            if !seen.insert(alias.as_str()) {
                return Err(UpstreamError::invalid_field(
                    alias.clone(),
                    "measurement column appears more than once",
                ));
            }
        }

        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.values.len() != aliases.len())
        {
            return Err(UpstreamError::validation(format!(
                "row {} has {} sensor values but the frame has {} sensor columns",
                index + 1,
                row.values.len(),
                aliases.len()
            )));
        }

        Ok(Self {
            aliases: aliases.into(),
            rows,
        })
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn rows(&self) -> &[MeasurementRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reading of `alias` in row `row`, if both exist and the cell is non-empty
    pub fn value(&self, row: usize, alias: &str) -> Option<f64> {
        let column = self.aliases.iter().position(|a| a == alias)?;
        self.rows.get(row)?.values.get(column).copied().flatten()
    }

    pub fn into_parts(self) -> (Arc<[String]>, Vec<MeasurementRow>) {
        (self.aliases, self.rows)
    }
}
