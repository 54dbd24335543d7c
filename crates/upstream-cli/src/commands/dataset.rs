//! `upstream dataset` command implementation
//!
//! Read-mostly access to the CKAN catalog.

use crate::ckan::{CkanApi, CkanDataset, DatasetSearch};
use crate::commands::ckan_client;
use crate::config::Config;
use crate::error::{CliError, Result};
use colored::Colorize;

/// Show one dataset
pub async fn show(config: &Config, name: &str, json: bool) -> Result<()> {
    let client = ckan_client(config)?;
    let dataset = client
        .show_dataset(name)
        .await?
        .ok_or_else(|| CliError::Other(anyhow::anyhow!("dataset '{}' not found", name)))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
        return Ok(());
    }

    print_dataset(&dataset, &client.dataset_url(&dataset.name));
    Ok(())
}

/// Delete a dataset
pub async fn delete(config: &Config, name: &str) -> Result<()> {
    let client = ckan_client(config)?;
    client.delete_dataset(name).await?;
    println!("{} Deleted dataset {}", "✓".green(), name.bold());
    Ok(())
}

/// Search datasets by text, organization, and tags
pub async fn search(
    config: &Config,
    query: Option<String>,
    organization: Option<String>,
    tags: Vec<String>,
    limit: u32,
) -> Result<()> {
    let client = ckan_client(config)?;
    let search = DatasetSearch {
        query,
        organization,
        tags,
        rows: Some(limit),
    };
    let found = client.search_datasets(&search).await?;

    if found.results.is_empty() {
        println!("No datasets found.");
        return Ok(());
    }

    println!(
        "{} ({} of {})",
        "Datasets:".cyan().bold(),
        found.results.len(),
        found.count
    );
    println!();
    for dataset in &found.results {
        let visibility = if dataset.private { "private" } else { "public" };
        println!(
            "  {:<40} {:<8} {}",
            dataset.name.as_str().green(),
            visibility,
            dataset.title.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

/// List organization names, or show one organization
pub async fn organizations(config: &Config, name: Option<&str>) -> Result<()> {
    let client = ckan_client(config)?;

    if let Some(name) = name {
        let org = client.get_organization(name).await?;
        println!("{}", org.title.as_deref().unwrap_or(&org.name).cyan().bold());
        println!("  {:<14} {}", "Name:", org.name);
        println!("  {:<14} {}", "ID:", org.id);
        if let Some(count) = org.package_count {
            println!("  {:<14} {}", "Datasets:", count);
        }
        if let Some(description) = org.description.as_deref().filter(|d| !d.is_empty()) {
            println!("  {:<14} {}", "Description:", truncate(description, 60));
        }
        return Ok(());
    }

    let names = client.list_organizations().await?;

    if names.is_empty() {
        println!("No organizations found.");
        return Ok(());
    }

    println!("{}", "Organizations:".cyan().bold());
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

fn print_dataset(dataset: &CkanDataset, url: &str) {
    println!("{}", dataset.title.as_deref().unwrap_or(&dataset.name).cyan().bold());
    println!();
    println!("  {:<14} {}", "Name:", dataset.name);
    println!("  {:<14} {}", "ID:", dataset.id);
    println!("  {:<14} {}", "URL:", url);
    println!(
        "  {:<14} {}",
        "Visibility:",
        if dataset.private { "private" } else { "public" }
    );
    if let Some(org) = &dataset.owner_org {
        println!("  {:<14} {}", "Organization:", org);
    }

    let tags: Vec<String> = dataset.tag_set().into_iter().collect();
    println!("  {:<14} {}", "Tags:", tags.join(", "));

    let extras = dataset.extras_map();
    if !extras.is_empty() {
        println!();
        println!("{}", "Extras:".cyan());
        for (key, value) in &extras {
            println!("  {:<24} {}", key, truncate(value, 60));
        }
    }

    if !dataset.resources.is_empty() {
        println!();
        println!("{}", "Resources:".cyan());
        for resource in &dataset.resources {
            println!(
                "  {} [{}]",
                resource.name.as_deref().unwrap_or(&resource.id),
                resource.format.as_deref().unwrap_or("?")
            );
        }
    }
}

/// Cut `value` to at most `max` characters, marking the cut
fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let cut: String = value.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
