//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod config;
pub mod dataset;
pub mod publish;
pub mod upload;
pub mod validate;

use crate::ckan::CkanClient;
use crate::config::Config;
use crate::error::Result;

/// CKAN client from configuration; fails when no catalog URL is set
pub(crate) fn ckan_client(config: &Config) -> Result<CkanClient> {
    let url = config.ckan.require_url()?;
    let policy = config.ckan.retry_policy(&config.upload);
    Ok(CkanClient::new(url, config.ckan.api_key.clone(), policy)?)
}
