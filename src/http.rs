//! HTTP source for mile-marker GPX files.
//!
//! Fetches `<base_url>/Full_<TRAIL>_Mile_Marker.gpx` with:
//! - A shared connection pool
//! - Automatic retry with exponential backoff on request errors and 429

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};

use crate::error::{Result, TrailMilesError};
use crate::markers::{marker_file_name, MarkerSource};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Marker source backed by a static file server.
pub struct HttpMarkerSource {
    client: Client,
    base_url: String,
}

impl HttpMarkerSource {
    /// Create a source serving marker files from `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                TrailMilesError::transport(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn marker_url(&self, trail_id: &str) -> String {
        format!("{}/{}", self.base_url, marker_file_name(trail_id))
    }
}

#[async_trait]
impl MarkerSource for HttpMarkerSource {
    async fn fetch(&self, trail_id: &str) -> Result<String> {
        let url = self.marker_url(trail_id);
        let mut retries = 0;

        loop {
            debug!("[HttpMarkerSource] GET {}", url);

            match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(TrailMilesError::Transport {
                                message: format!("max retries exceeded for {}", url),
                                status_code: Some(status.as_u16()),
                            });
                        }

                        let backoff = Duration::from_millis(1000 * (1 << retries));
                        warn!(
                            "[HttpMarkerSource] 429 for {}, retry {} after {:?}",
                            url, retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(TrailMilesError::Transport {
                            message: format!("GET {} failed", url),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    let body = resp.text().await?;
                    info!(
                        "[HttpMarkerSource] Fetched {} bytes for {}",
                        body.len(),
                        trail_id
                    );
                    return Ok(body);
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(e.into());
                    }

                    let backoff = Duration::from_millis(500 * (1 << retries));
                    warn!(
                        "[HttpMarkerSource] Error for {}: {}, retry {} after {:?}",
                        url, e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_url() {
        let source = HttpMarkerSource::new("https://example.com/data/").unwrap();
        assert_eq!(
            source.marker_url("pct"),
            "https://example.com/data/Full_PCT_Mile_Marker.gpx"
        );
    }
}
