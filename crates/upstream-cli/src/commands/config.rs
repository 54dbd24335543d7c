//! `upstream config` command implementation
//!
//! Shows the effective configuration after file and environment overlays.

use crate::config::{Config, ENV_VARS};
use crate::error::Result;
use colored::Colorize;

/// Show all configuration
pub async fn show(config: &Config) -> Result<()> {
    println!("{}", "Upstream CLI Configuration:".cyan().bold());
    println!();
    for (key, value) in entries(config) {
        println!("{:<28} {}", format!("{}:", key), value);
    }
    println!();
    println!("{}", "Environment Variables:".cyan());
    for (name, description) in ENV_VARS {
        println!("  {:<28} - {}", name, description);
    }

    Ok(())
}

/// Display rows, with secrets masked
fn entries(config: &Config) -> Vec<(&'static str, String)> {
    let or_unset = |value: &Option<String>| value.clone().unwrap_or_else(|| "(not set)".to_string());
    let base_url = if config.upstream.base_url.is_empty() {
        "(not set)".to_string()
    } else {
        config.upstream.base_url.clone()
    };

    vec![
        ("upstream.base_url", base_url),
        ("upstream.access_token", mask(config.upstream.access_token.as_deref())),
        ("ckan.url", or_unset(&config.ckan.url)),
        ("ckan.api_key", mask(config.ckan.api_key.as_deref())),
        ("ckan.default_organization", or_unset(&config.ckan.default_organization)),
        ("ckan.auto_publish", config.ckan.auto_publish.to_string()),
        ("ckan.timeout_seconds", config.ckan.timeout_seconds.to_string()),
        ("upload.chunk_size", config.upload.chunk_size.to_string()),
        ("upload.max_chunk_size_mb", config.upload.max_chunk_size_mb.to_string()),
        ("upload.retry_attempts", config.upload.retry_attempts.to_string()),
        ("upload.timeout_seconds", config.upload.timeout_seconds.to_string()),
        ("upload.max_parallel", config.upload.max_parallel.to_string()),
        ("upload.backoff_base_ms", config.upload.backoff_base_ms.to_string()),
        ("upload.backoff_max_ms", config.upload.backoff_max_ms.to_string()),
    ]
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        None => "(not set)".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => {
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{}", tail)
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask(None), "(not set)");
        assert_eq!(mask(Some("abc")), "****");
        assert_eq!(mask(Some("secret-token-1234")), "****1234");
    }

    #[test]
    fn test_entries_hide_secrets() {
        let mut config = Config::default();
        config.upstream.access_token = Some("very-secret-token".into());
        let rows = entries(&config);

        let token = rows.iter().find(|(k, _)| *k == "upstream.access_token").unwrap();
        assert_eq!(token.1, "****oken");
        assert!(rows.iter().all(|(_, v)| !v.contains("very-secret")));
    }

    #[tokio::test]
    async fn test_config_show() {
        assert!(show(&Config::default()).await.is_ok());
    }
}
