//! Progress indicators for uploads and catalog calls

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const CHUNK_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} chunks ({eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

/// Bar advanced once per settled chunk. Hidden when `visible` is false.
pub fn create_chunk_progress(total_chunks: u64, message: &str, visible: bool) -> ProgressBar {
    let pb = ProgressBar::new(total_chunks);
    if !visible {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }
    pb.set_style(
        ProgressStyle::default_bar()
            .template(CHUNK_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Spinner for calls of unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.00 MB");
    }

    #[test]
    fn test_templates_parse() {
        assert!(ProgressStyle::default_bar().template(CHUNK_TEMPLATE).is_ok());
        assert!(ProgressStyle::default_spinner().template(SPINNER_TEMPLATE).is_ok());
    }

    #[test]
    fn test_chunk_progress() {
        let pb = create_chunk_progress(20, "Uploading", false);
        assert_eq!(pb.length(), Some(20));
        pb.inc(3);
        assert_eq!(pb.position(), 3);
    }

    #[test]
    fn test_create_spinner() {
        let pb = create_spinner("Publishing...");
        assert!(!pb.is_finished());
        pb.finish();
    }
}
