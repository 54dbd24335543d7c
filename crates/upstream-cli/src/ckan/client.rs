//! CKAN action API client
//!
//! [`CkanApi`] is the catalog capability the publish orchestrator depends on;
//! [`CkanClient`] implements it over HTTP. Every call is retried on
//! transient failures and bounded by the policy's request timeout. Create
//! calls are not idempotent, so after a timeout or 5xx the client looks for
//! the dataset or resource before sending again.

use crate::ckan::types::*;
use crate::retry::{retry_with_backoff, retry_with_recovery, RetryPolicy};
use crate::transport::{check_status, TransportError};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use upstream_common::{Result, UpstreamError};

/// Catalog operations used by this tool
#[async_trait]
pub trait CkanApi: Send + Sync {
    /// Fetch a dataset by id or name; `None` when it does not exist
    async fn show_dataset(&self, id: &str) -> Result<Option<CkanDataset>>;

    async fn create_dataset(&self, dataset: &NewDataset) -> Result<CkanDataset>;

    /// Write a full dataset body. Fields left out are cleared by the server.
    async fn update_dataset(&self, dataset: &CkanDataset) -> Result<CkanDataset>;

    async fn delete_dataset(&self, id: &str) -> Result<()>;

    async fn upload_resource(&self, resource: &ResourceUpload) -> Result<CkanResource>;

    async fn get_organization(&self, id: &str) -> Result<CkanOrganization>;

    /// Organization names
    async fn list_organizations(&self) -> Result<Vec<String>>;

    async fn search_datasets(&self, search: &DatasetSearch) -> Result<SearchResult>;

    /// Public page of a dataset
    fn dataset_url(&self, name: &str) -> String;
}

/// HTTP client for a CKAN instance
#[derive(Debug, Clone)]
pub struct CkanClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl CkanClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, policy: RetryPolicy) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(UpstreamError::configuration("ckan.url", "CKAN URL is required"));
        }

        let client = Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(concat!("upstream-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::configuration("ckan.url", e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            policy,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{}", self.base_url, action)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, key),
            None => request,
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<Option<T>, TransportError> {
        let request = self.client.get(self.action_url(action)).query(params);
        let response = self.authorized(request).send().await?;
        decode(check_status(response).await?).await
    }

    async fn post_once<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        action: &str,
        body: &B,
    ) -> std::result::Result<Option<T>, TransportError> {
        let request = self.client.post(self.action_url(action)).json(body);
        let response = self.authorized(request).send().await?;
        decode(check_status(response).await?).await
    }

    async fn upload_once(&self, upload: &ResourceUpload) -> std::result::Result<Option<CkanResource>, TransportError> {
        let request = self
            .client
            .post(self.action_url("resource_create"))
            .multipart(resource_form(upload)?);
        let response = self.authorized(request).send().await?;
        decode(check_status(response).await?).await
    }

    /// `package_show` without retries; 404 is `None`
    async fn find_dataset_once(&self, id: &str) -> std::result::Result<Option<CkanDataset>, TransportError> {
        match self.get_once("package_show", &[("id", id.to_string())]).await {
            Err(TransportError::Status { status: 404, .. }) => Ok(None),
            other => other,
        }
    }

    /// A resource with this name already attached to the dataset
    async fn find_resource_once(
        &self,
        upload: &ResourceUpload,
    ) -> std::result::Result<Option<CkanResource>, TransportError> {
        let dataset = self.find_dataset_once(&upload.package_id).await?;
        Ok(dataset.and_then(|d| {
            d.resources
                .into_iter()
                .find(|r| r.name.as_deref() == Some(upload.name.as_str()))
        }))
    }

    async fn get<T: DeserializeOwned>(&self, action: &str, params: &[(&str, String)]) -> Result<T> {
        let result = retry_with_backoff(&self.policy, action, || self.get_once(action, params)).await;
        required(action, result)
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized + Sync>(&self, action: &str, body: &B) -> Result<T> {
        let result = retry_with_backoff(&self.policy, action, || self.post_once(action, body)).await;
        required(action, result)
    }
}

#[async_trait]
impl CkanApi for CkanClient {
    async fn show_dataset(&self, id: &str) -> Result<Option<CkanDataset>> {
        let params = [("id", id.to_string())];
        let result = retry_with_backoff(&self.policy, "package_show", || {
            self.get_once::<CkanDataset>("package_show", &params)
        })
        .await;

        match result {
            Ok(dataset) => Ok(dataset),
            Err(TransportError::Status { status: 404, .. }) => {
                debug!(dataset = id, "Dataset does not exist");
                Ok(None)
            },
            Err(err) => Err(api_error("package_show", err)),
        }
    }

    async fn create_dataset(&self, dataset: &NewDataset) -> Result<CkanDataset> {
        let result = retry_with_recovery(
            &self.policy,
            "package_create",
            || self.post_once("package_create", dataset),
            move || async move { Ok::<_, TransportError>(self.find_dataset_once(&dataset.name).await?.map(Some)) },
        )
        .await;
        let created: CkanDataset = required("package_create", result)?;
        info!(dataset = %created.name, id = %created.id, "Created CKAN dataset");
        Ok(created)
    }

    async fn update_dataset(&self, dataset: &CkanDataset) -> Result<CkanDataset> {
        let updated: CkanDataset = self.post("package_update", dataset).await?;
        info!(dataset = %updated.name, "Updated CKAN dataset");
        Ok(updated)
    }

    async fn delete_dataset(&self, id: &str) -> Result<()> {
        let body = json!({ "id": id });
        retry_with_backoff(&self.policy, "package_delete", || {
            self.post_once::<serde_json::Value, _>("package_delete", &body)
        })
        .await
        .map_err(|e| api_error("package_delete", e))?;
        info!(dataset = id, "Deleted CKAN dataset");
        Ok(())
    }

    async fn upload_resource(&self, resource: &ResourceUpload) -> Result<CkanResource> {
        let result = retry_with_recovery(
            &self.policy,
            "resource_create",
            || self.upload_once(resource),
            move || async move { Ok::<_, TransportError>(self.find_resource_once(resource).await?.map(Some)) },
        )
        .await;
        let created = required("resource_create", result)?;
        info!(
            dataset = %resource.package_id,
            resource = %created.id,
            name = %resource.name,
            bytes = resource.content.len(),
            "Uploaded CKAN resource"
        );
        Ok(created)
    }

    async fn get_organization(&self, id: &str) -> Result<CkanOrganization> {
        self.get("organization_show", &[("id", id.to_string())]).await
    }

    async fn list_organizations(&self) -> Result<Vec<String>> {
        self.get("organization_list", &[]).await
    }

    async fn search_datasets(&self, search: &DatasetSearch) -> Result<SearchResult> {
        self.get("package_search", &search.to_params()).await
    }

    fn dataset_url(&self, name: &str) -> String {
        format!("{}/dataset/{}", self.base_url, name)
    }
}

/// Unwrap the action envelope. `success: false` is a permanent failure.
async fn decode<T: DeserializeOwned>(response: Response) -> std::result::Result<Option<T>, TransportError> {
    let envelope: CkanResponse<T> = response
        .json()
        .await
        .map_err(|e| TransportError::Decode(e.to_string()))?;

    if !envelope.success {
        let detail = envelope
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no error detail".to_string());
        return Err(TransportError::Other(format!("action unsuccessful: {}", detail)));
    }

    Ok(envelope.result)
}

fn required<T>(action: &str, result: std::result::Result<Option<T>, TransportError>) -> Result<T> {
    match result {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(UpstreamError::api(None, format!("CKAN {} returned no result", action))),
        Err(err) => Err(api_error(action, err)),
    }
}

fn api_error(action: &str, err: TransportError) -> UpstreamError {
    UpstreamError::api(err.status(), format!("CKAN {} failed: {}", action, err))
}

fn resource_form(upload: &ResourceUpload) -> std::result::Result<Form, TransportError> {
    let mime = if upload.format.eq_ignore_ascii_case("csv") {
        "text/csv"
    } else {
        "application/octet-stream"
    };
    let file = Part::bytes(upload.content.clone())
        .file_name(upload.file_name.clone())
        .mime_str(mime)?;

    let mut form = Form::new()
        .text("package_id", upload.package_id.clone())
        .text("name", upload.name.clone())
        .text("description", upload.description.clone())
        .text("format", upload.format.clone())
        .text("resource_type", "data");
    for (key, value) in &upload.metadata {
        form = form.text(key.clone(), value.clone());
    }

    Ok(form.part("upload", file))
}
