//! Publish orchestrator
//!
//! Creates or updates a catalog dataset from a [`DatasetPatch`] and attaches
//! a station's sensors and measurements files as resources.
//!
//! ```text
//! NotExists --create--> Created --resources--> (published)
//! Exists    --reconcile + update--> Updated --resources--> (published)
//! ```
//!
//! Metadata is reconciled before anything is written, so an oversized patch
//! leaves the dataset untouched. Concurrent publishers of the same dataset
//! are not coordinated: the last update wins.

use crate::ckan::reconcile::{reconcile, ReconciledMetadata};
use crate::ckan::types::{extras_to_wire, tags_to_wire, CkanDataset, NewDataset, ResourceUpload};
use crate::ckan::CkanApi;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use upstream_common::types::{DatasetPatch, PatchMode};
use upstream_common::{Result, UpstreamError};

/// Settings the orchestrator needs from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSettings {
    /// Owner of newly created datasets
    pub organization: Option<String>,
    /// Make the dataset public once its resources are attached
    pub auto_publish: bool,
}

/// A file to attach as a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    /// Resource display name
    pub name: String,
    pub description: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Everything needed to publish one station's data
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub dataset_slug: String,
    /// Title used when the dataset is created and the patch has none
    pub default_title: String,
    /// Dataset description, set on creation
    pub description: Option<String>,
    pub sensors: ResourceFile,
    pub measurements: ResourceFile,
    /// Set as top-level fields on both resources
    pub resource_metadata: BTreeMap<String, String>,
    pub patch: DatasetPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetState {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of a publish run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub dataset_slug: String,
    pub dataset_id: String,
    pub dataset_url: String,
    pub mode: PatchMode,
    pub state: DatasetState,
    /// Ids of resources attached in this run
    pub resources_updated: Vec<String>,
    pub resource_failures: Vec<ResourceFailure>,
    /// Whether the dataset is public after this run
    pub public: bool,
}

impl PublishResult {
    /// Metadata was written but at least one resource was not
    pub fn is_partial(&self) -> bool {
        !self.resource_failures.is_empty()
    }
}

pub struct Publisher<C> {
    ckan: C,
    settings: PublishSettings,
}

impl<C: CkanApi> Publisher<C> {
    pub fn new(ckan: C, settings: PublishSettings) -> Self {
        Self { ckan, settings }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishResult> {
        let slug = request.dataset_slug.as_str();
        let current = self.ckan.show_dataset(slug).await?;

        let (dataset, state) = match current {
            None => (self.create(&request).await?, DatasetState::Created),
            Some(current) => (self.update(current, &request.patch).await?, DatasetState::Updated),
        };

        let mut resources_updated = Vec::new();
        let mut resource_failures = Vec::new();
        for file in [&request.sensors, &request.measurements] {
            let upload = ResourceUpload {
                package_id: dataset.id.clone(),
                name: file.name.clone(),
                description: file.description.clone(),
                format: "CSV".to_string(),
                file_name: file.file_name.clone(),
                content: file.content.clone(),
                metadata: request.resource_metadata.clone(),
            };

            match self.ckan.upload_resource(&upload).await {
                Ok(resource) => resources_updated.push(resource.id),
                Err(err) => {
                    warn!(dataset = slug, resource = %file.name, error = %err, "Resource upload failed");
                    resource_failures.push(ResourceFailure {
                        name: file.name.clone(),
                        error: err.to_string(),
                    });
                },
            }
        }

        let mut public = !dataset.private;
        if self.settings.auto_publish && !public && resource_failures.is_empty() {
            public = self.make_public(&dataset.id).await?;
        }

        let result = PublishResult {
            dataset_slug: dataset.name.clone(),
            dataset_id: dataset.id.clone(),
            dataset_url: self.ckan.dataset_url(&dataset.name),
            mode: request.patch.mode,
            state,
            resources_updated,
            resource_failures,
            public,
        };

        info!(
            dataset = %result.dataset_slug,
            state = ?result.state,
            mode = %result.mode,
            resources = result.resources_updated.len(),
            failed_resources = result.resource_failures.len(),
            public = result.public,
            "Publish finished"
        );

        Ok(result)
    }

    async fn create(&self, request: &PublishRequest) -> Result<CkanDataset> {
        let organization = self
            .settings
            .organization
            .as_deref()
            .filter(|org| !org.trim().is_empty())
            .ok_or_else(|| {
                UpstreamError::configuration(
                    "ckan.default_organization",
                    format!(
                        "an organization is required to create dataset '{}'",
                        request.dataset_slug
                    ),
                )
            })?;

        let ReconciledMetadata { tags, extras, title } =
            reconcile(&BTreeSet::new(), &BTreeMap::new(), &request.patch)?;

        let dataset = NewDataset {
            name: request.dataset_slug.clone(),
            title: title.unwrap_or_else(|| request.default_title.clone()),
            notes: request.description.clone(),
            owner_org: organization.to_string(),
            // Stays private until resources are attached
            private: true,
            tags: tags_to_wire(&tags),
            extras: extras_to_wire(&extras),
        };

        self.ckan.create_dataset(&dataset).await
    }

    async fn update(&self, mut current: CkanDataset, patch: &DatasetPatch) -> Result<CkanDataset> {
        let reconciled = reconcile(&current.tag_set(), &current.extras_map(), patch)?;

        current.set_tags(&reconciled.tags);
        current.set_extras(&reconciled.extras);
        if let Some(title) = reconciled.title {
            current.title = Some(title);
        }

        self.ckan.update_dataset(&current).await
    }

    /// Flip a dataset public, starting from a fresh copy so the resources
    /// attached in this run are kept
    async fn make_public(&self, id: &str) -> Result<bool> {
        let Some(mut fresh) = self.ckan.show_dataset(id).await? else {
            return Err(UpstreamError::api(Some(404), format!("dataset '{}' vanished before publishing", id)));
        };
        fresh.private = false;
        let updated = self.ckan.update_dataset(&fresh).await?;
        Ok(!updated.private)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ckan::types::*;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;

    /// Single-dataset in-memory catalog
    #[derive(Default)]
    struct FakeCkan {
        dataset: Mutex<Option<CkanDataset>>,
        fail_resources: Vec<String>,
        creates: Mutex<u32>,
        updates: Mutex<Vec<CkanDataset>>,
        uploads: Mutex<Vec<String>>,
    }

    impl FakeCkan {
        fn with_dataset(tags: &[&str], extras: &[(&str, &str)]) -> Self {
            let dataset = CkanDataset {
                id: "ds-1".into(),
                name: "upstream-campaign-1".into(),
                title: Some("Original".into()),
                notes: None,
                owner_org: Some("org".into()),
                private: false,
                tags: tags.iter().map(|t| CkanTag { name: t.to_string() }).collect(),
                extras: extras
                    .iter()
                    .map(|(k, v)| CkanExtra {
                        key: k.to_string(),
                        value: v.to_string(),
                    })
                    .collect(),
                resources: Vec::new(),
                other: Map::new(),
            };
            Self {
                dataset: Mutex::new(Some(dataset)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl CkanApi for FakeCkan {
        async fn show_dataset(&self, _id: &str) -> Result<Option<CkanDataset>> {
            Ok(self.dataset.lock().unwrap().clone())
        }

        async fn create_dataset(&self, new: &NewDataset) -> Result<CkanDataset> {
            *self.creates.lock().unwrap() += 1;
            let dataset = CkanDataset {
                id: "ds-new".into(),
                name: new.name.clone(),
                title: Some(new.title.clone()),
                notes: new.notes.clone(),
                owner_org: Some(new.owner_org.clone()),
                private: new.private,
                tags: new.tags.clone(),
                extras: new.extras.clone(),
                resources: Vec::new(),
                other: Map::new(),
            };
            *self.dataset.lock().unwrap() = Some(dataset.clone());
            Ok(dataset)
        }

        async fn update_dataset(&self, dataset: &CkanDataset) -> Result<CkanDataset> {
            self.updates.lock().unwrap().push(dataset.clone());
            *self.dataset.lock().unwrap() = Some(dataset.clone());
            Ok(dataset.clone())
        }

        async fn delete_dataset(&self, _id: &str) -> Result<()> {
            *self.dataset.lock().unwrap() = None;
            Ok(())
        }

        async fn upload_resource(&self, resource: &ResourceUpload) -> Result<CkanResource> {
            if self.fail_resources.contains(&resource.name) {
                return Err(UpstreamError::api(Some(502), "resource_create failed"));
            }
            self.uploads.lock().unwrap().push(resource.name.clone());
            Ok(CkanResource {
                id: format!("res-{}", resource.name),
                name: Some(resource.name.clone()),
                format: Some(resource.format.clone()),
                url: None,
                other: Map::new(),
            })
        }

        async fn get_organization(&self, id: &str) -> Result<CkanOrganization> {
            Ok(CkanOrganization {
                id: id.into(),
                name: id.into(),
                title: None,
                description: None,
                package_count: None,
            })
        }

        async fn list_organizations(&self) -> Result<Vec<String>> {
            Ok(vec!["org".into()])
        }

        async fn search_datasets(&self, _search: &DatasetSearch) -> Result<SearchResult> {
            Ok(SearchResult {
                count: 0,
                results: Vec::new(),
            })
        }

        fn dataset_url(&self, name: &str) -> String {
            format!("https://ckan.test/dataset/{}", name)
        }
    }

    fn file(name: &str) -> ResourceFile {
        ResourceFile {
            name: name.into(),
            description: "test".into(),
            file_name: format!("{}.csv", name),
            content: b"a,b\n1,2\n".to_vec(),
        }
    }

    fn request(patch: DatasetPatch) -> PublishRequest {
        PublishRequest {
            dataset_slug: "upstream-campaign-1".into(),
            default_title: "Campaign 1".into(),
            description: Some("Test campaign".into()),
            sensors: file("sensors"),
            measurements: file("measurements"),
            resource_metadata: BTreeMap::from([("station_id".to_string(), "7".to_string())]),
            patch,
        }
    }

    fn settings(org: Option<&str>, auto_publish: bool) -> PublishSettings {
        PublishSettings {
            organization: org.map(String::from),
            auto_publish,
        }
    }

    #[tokio::test]
    async fn test_creates_missing_dataset_then_publishes() {
        let publisher = Publisher::new(FakeCkan::default(), settings(Some("org"), true));
        let patch = DatasetPatch::new(PatchMode::Merge).with_tags(["sensors", "upstream"]);

        let result = publisher.publish(request(patch)).await.unwrap();

        assert_eq!(result.state, DatasetState::Created);
        assert_eq!(result.dataset_url, "https://ckan.test/dataset/upstream-campaign-1");
        assert_eq!(result.resources_updated, vec!["res-sensors", "res-measurements"]);
        assert!(result.public);
        assert!(!result.is_partial());

        let stored = publisher.ckan.dataset.lock().unwrap().clone().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Campaign 1"));
        assert_eq!(stored.tag_set().len(), 2);
        assert!(!stored.private);
    }

    #[tokio::test]
    async fn test_create_without_organization_fails_fast() {
        let publisher = Publisher::new(FakeCkan::default(), settings(None, true));
        let err = publisher
            .publish(request(DatasetPatch::new(PatchMode::Merge)))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Configuration { .. }));
        assert_eq!(*publisher.ckan.creates.lock().unwrap(), 0);
        assert!(publisher.ckan.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_dataset_merge() {
        let ckan = FakeCkan::with_dataset(&["test", "initial"], &[("source", "old"), ("keep", "me")]);
        let publisher = Publisher::new(ckan, settings(None, false));
        let patch = DatasetPatch::new(PatchMode::Merge)
            .with_tags(["updated", "integration-test"])
            .with_extra("source", "Upstream Platform");

        let result = publisher.publish(request(patch)).await.unwrap();
        assert_eq!(result.state, DatasetState::Updated);
        assert_eq!(result.mode, PatchMode::Merge);

        let updates = publisher.ckan.updates.lock().unwrap();
        let written = &updates[0];
        assert_eq!(written.tag_set().len(), 4);
        assert_eq!(written.extras_map()["source"], "Upstream Platform");
        assert_eq!(written.extras_map()["keep"], "me");
        assert_eq!(written.title.as_deref(), Some("Original"));
    }

    #[tokio::test]
    async fn test_existing_dataset_replace() {
        let ckan = FakeCkan::with_dataset(&["test", "initial"], &[("keep", "me")]);
        let publisher = Publisher::new(ckan, settings(None, false));
        let patch = DatasetPatch::new(PatchMode::Replace)
            .with_tags(["replaced", "final"])
            .with_title("Final");

        publisher.publish(request(patch)).await.unwrap();

        let stored = publisher.ckan.dataset.lock().unwrap().clone().unwrap();
        assert_eq!(
            stored.tag_set(),
            BTreeSet::from(["final".to_string(), "replaced".to_string()])
        );
        assert!(stored.extras.is_empty());
        assert_eq!(stored.title.as_deref(), Some("Final"));
    }

    #[tokio::test]
    async fn test_oversized_extras_write_nothing() {
        let ckan = FakeCkan::with_dataset(&["test"], &[]);
        let publisher = Publisher::new(ckan, settings(Some("org"), true));
        let patch = DatasetPatch::new(PatchMode::Merge).with_extra("blob", "x".repeat(40_000));

        let err = publisher.publish(request(patch)).await.unwrap_err();

        assert!(matches!(err, UpstreamError::ExtrasTooLarge { .. }));
        assert!(publisher.ckan.updates.lock().unwrap().is_empty());
        assert!(publisher.ckan.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resource_failure_is_partial() {
        let mut ckan = FakeCkan::default();
        ckan.fail_resources = vec!["measurements".to_string()];
        let publisher = Publisher::new(ckan, settings(Some("org"), true));

        let result = publisher
            .publish(request(DatasetPatch::new(PatchMode::Merge)))
            .await
            .unwrap();

        assert!(result.is_partial());
        assert_eq!(result.resources_updated, vec!["res-sensors"]);
        assert_eq!(result.resource_failures[0].name, "measurements");
        assert!(result.resource_failures[0].error.contains("502"));
        // Not made public with a missing resource
        assert!(!result.public);
    }
}
