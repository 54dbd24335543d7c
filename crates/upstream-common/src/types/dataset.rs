//! Dataset metadata patches
//!
//! A [`DatasetPatch`] describes the tags, extras, and title a publish run wants
//! on a catalog dataset. How it combines with what the catalog already holds
//! is decided by its [`PatchMode`].

use crate::error::{Result, UpstreamError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Timestamp layout used for every time-valued extra
pub const EXTRA_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp the way extras store it
pub fn format_extra_timestamp(time: &DateTime<Utc>) -> String {
    time.format(EXTRA_TIMESTAMP_FORMAT).to_string()
}

/// How a patch combines with existing metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMode {
    /// Union tags, overlay extras (patch wins on key conflicts)
    #[default]
    Merge,
    /// Patch content becomes the full metadata
    Replace,
}

impl PatchMode {
    pub fn as_str(&self) -> &str {
        match self {
            PatchMode::Merge => "merge",
            PatchMode::Replace => "replace",
        }
    }
}

impl fmt::Display for PatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchMode {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(PatchMode::Merge),
            "replace" => Ok(PatchMode::Replace),
            other => Err(UpstreamError::invalid_field(
                "mode",
                format!("unknown patch mode '{}', expected 'merge' or 'replace'", other),
            )),
        }
    }
}

/// Desired metadata for a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPatch {
    pub tags: BTreeSet<String>,
    pub extras: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: PatchMode,
}

impl DatasetPatch {
    pub fn new(mode: PatchMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Add a tag. Surrounding whitespace is trimmed and blank tags are ignored.
    pub fn with_tag(mut self, tag: impl AsRef<str>) -> Self {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() {
            self.tags.insert(tag.to_string());
        }
        self
    }

    pub fn with_tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags.into_iter().fold(self, |patch, tag| patch.with_tag(tag))
    }

    /// Set an extra. A later call with the same key replaces the value.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Set an extra whose value is a structured record, stored as JSON text
    pub fn with_extra_json<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.with_extra(key, encoded))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = if title.trim().is_empty() { None } else { Some(title) };
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.extras.is_empty() && self.title.is_none()
    }
}
