//! CKAN action API types
//!
//! Only the fields this tool reads or writes are typed. Everything else a
//! dataset carries is kept in `other` so an update sends it back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Envelope of every CKAN action response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CkanResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkanTag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkanExtra {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CkanResource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CkanDataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub owner_org: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub tags: Vec<CkanTag>,
    #[serde(default)]
    pub extras: Vec<CkanExtra>,
    #[serde(default)]
    pub resources: Vec<CkanResource>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl CkanDataset {
    pub fn tag_set(&self) -> BTreeSet<String> {
        self.tags.iter().map(|t| t.name.clone()).collect()
    }

    /// Extras as a map; a repeated key keeps its last value
    pub fn extras_map(&self) -> BTreeMap<String, String> {
        self.extras
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    pub fn set_tags(&mut self, tags: &BTreeSet<String>) {
        self.tags = tags_to_wire(tags);
    }

    pub fn set_extras(&mut self, extras: &BTreeMap<String, String>) {
        self.extras = extras_to_wire(extras);
    }
}

/// Body of `package_create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDataset {
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub owner_org: String,
    pub private: bool,
    pub tags: Vec<CkanTag>,
    pub extras: Vec<CkanExtra>,
}

/// A file to attach to a dataset with `resource_create`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUpload {
    pub package_id: String,
    pub name: String,
    pub description: String,
    pub format: String,
    pub file_name: String,
    pub content: Vec<u8>,
    /// Set as top-level resource fields, not as extras
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CkanOrganization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub package_count: Option<u64>,
}

/// Filters for `package_search`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSearch {
    pub query: Option<String>,
    pub organization: Option<String>,
    pub tags: Vec<String>,
    pub rows: Option<u32>,
}

impl DatasetSearch {
    /// Query-string parameters for the action call
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(q) = &self.query {
            params.push(("q", q.clone()));
        }

        let mut filters = Vec::new();
        if let Some(org) = &self.organization {
            filters.push(format!("organization:{}", org));
        }
        filters.extend(self.tags.iter().map(|t| format!("tags:{}", t)));
        if !filters.is_empty() {
            params.push(("fq", filters.join(" AND ")));
        }

        if let Some(rows) = self.rows {
            params.push(("rows", rows.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub count: u64,
    #[serde(default)]
    pub results: Vec<CkanDataset>,
}

pub fn tags_to_wire(tags: &BTreeSet<String>) -> Vec<CkanTag> {
    tags.iter().map(|name| CkanTag { name: name.clone() }).collect()
}

pub fn extras_to_wire(extras: &BTreeMap<String, String>) -> Vec<CkanExtra> {
    extras
        .iter()
        .map(|(key, value)| CkanExtra {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}
