//! API endpoint URL builders
//!
//! Helper functions to construct platform endpoint URLs. Base URLs may carry
//! a path prefix (e.g. `/dev`) and a trailing slash.

fn trim(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Build the bulk CSV upload URL for a station
pub fn upload_csv_url(base_url: &str, campaign_id: &str, station_id: &str) -> String {
    format!(
        "{}/api/v1/uploadfile_csv/campaign/{}/station/{}/sensor",
        trim(base_url),
        campaign_id,
        station_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_csv_url() {
        let url = upload_csv_url("https://upstream.example.org/dev", "12", "34");
        assert_eq!(
            url,
            "https://upstream.example.org/dev/api/v1/uploadfile_csv/campaign/12/station/34/sensor"
        );
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        assert_eq!(
            upload_csv_url("http://localhost:8000/", "1", "2"),
            "http://localhost:8000/api/v1/uploadfile_csv/campaign/1/station/2/sensor"
        );
    }
}
