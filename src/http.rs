//! HTTP client for a Garmin-Connect-style activity API.
//!
//! This module provides the blocking [`RemoteSource`] used by the CLI:
//! - Paged, ascending activity listing by date range
//! - Activity detail and GPX export by id
//! - Automatic retry with exponential backoff on 429 and transport errors
//!
//! Requests run on a private tokio runtime; every trait method blocks until
//! its request finishes, so the sync loop stays strictly sequential.

use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::runtime::Runtime;

use crate::remote::{normalize_payload, summarize_payload};
use crate::{
    ActivityId, Error, RemoteActivityDetail, RemoteActivitySummary, RemoteConfig, RemoteSource,
    Result,
};

const MAX_RETRIES: u32 = 3;
const PAGE_SIZE: usize = 100;

const LIST_PATH: &str = "/activitylist-service/activities/search/activities";
const DETAIL_PATH: &str = "/activity-service/activity";
const GPX_PATH: &str = "/download-service/export/gpx/activity";

/// Blocking HTTP remote source.
pub struct HttpSource {
    client: Client,
    runtime: Runtime,
    base_url: String,
    auth_header: Option<String>,
}

impl HttpSource {
    /// Create a new source from the remote configuration.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::remote(format!("Failed to create HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        if config.token.is_none() {
            warn!("[HttpSource] No remote token configured, requests will be anonymous");
        }

        Ok(Self {
            client,
            runtime,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: config.token.as_ref().map(|t| format!("Bearer {}", t)),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET with retries. `Ok(None)` on 404.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Response>> {
        let mut retries = 0;

        loop {
            let mut request = self.client.get(url).query(query);
            if let Some(auth) = &self.auth_header {
                request = request.header("Authorization", auth);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            return Err(Error::RemoteUnavailable {
                                message: format!("Max retries exceeded (429) for {}", url),
                                status_code: Some(status.as_u16()),
                            });
                        }

                        let backoff = rate_limit_backoff(retries);
                        warn!(
                            "[HttpSource] 429 for {}, retry {} after {:?}",
                            url, retries, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }

                    if !status.is_success() {
                        return Err(Error::RemoteUnavailable {
                            message: format!("HTTP {} for {}", status, url),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    return Ok(Some(resp));
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(Error::remote(format!("Request error for {}: {}", url, e)));
                    }

                    let backoff = transport_backoff(retries);
                    warn!(
                        "[HttpSource] Error for {}: {}, retry {} after {:?}",
                        url, e, retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        match self.get(url, query).await? {
            Some(resp) => resp
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|e| Error::remote(format!("Parse error for {}: {}", url, e))),
            None => Ok(None),
        }
    }

    async fn list_page(
        &self,
        from: NaiveDate,
        to: Option<NaiveDate>,
        start: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut query = vec![
            ("startDate", from.format("%Y-%m-%d").to_string()),
            ("start", start.to_string()),
            ("limit", limit.to_string()),
            ("sortOrder", "asc".to_string()),
        ];
        if let Some(to) = to {
            query.push(("endDate", to.format("%Y-%m-%d").to_string()));
        }

        match self.get_json(&self.endpoint(LIST_PATH), &query).await? {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(Error::remote(format!(
                "Unexpected listing payload: {}",
                truncate(&other.to_string(), 120)
            ))),
            None => Ok(Vec::new()),
        }
    }
}

impl RemoteSource for HttpSource {
    fn list_activities(
        &self,
        from: NaiveDate,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<RemoteActivitySummary>> {
        let mut summaries = Vec::new();
        let page_size = limit.clamp(1, PAGE_SIZE);
        let mut start = 0;

        while summaries.len() < limit {
            let page = self
                .runtime
                .block_on(self.list_page(from, to, start, page_size))?;
            let fetched = page.len();

            for item in &page {
                match summarize_payload(item) {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => warn!("[HttpSource] Ignoring malformed listing entry: {}", e),
                }
            }

            if fetched < page_size {
                break;
            }
            start += fetched;
        }

        summaries.sort_by(|a, b| (a.start_local, &a.id).cmp(&(b.start_local, &b.id)));
        summaries.truncate(limit);

        info!(
            "[HttpSource] Listed {} activities since {}",
            summaries.len(),
            from
        );
        Ok(summaries)
    }

    fn fetch_detail(&self, id: &ActivityId) -> Result<Option<RemoteActivityDetail>> {
        let url = format!("{}/{}", self.endpoint(DETAIL_PATH), id);
        debug!("[HttpSource] Fetching detail {}", url);
        match self.runtime.block_on(self.get_json(&url, &[]))? {
            Some(payload) => Ok(Some(normalize_payload(payload)?)),
            None => Ok(None),
        }
    }

    fn fetch_track(&self, id: &ActivityId) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.endpoint(GPX_PATH), id);
        debug!("[HttpSource] Fetching track {}", url);
        self.runtime.block_on(async {
            match self.get(&url, &[]).await? {
                Some(resp) => resp
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| Error::remote(format!("Read error for {}: {}", url, e))),
                None => Ok(Vec::new()),
            }
        })
    }
}

/// Exponential backoff for 429: 2s, 4s, 8s, 16s (capped).
fn rate_limit_backoff(retries: u32) -> Duration {
    Duration::from_millis(1000 * (1 << retries.min(4)))
}

/// Exponential backoff for transport errors: 1s, 2s, 4s...
fn transport_backoff(retries: u32) -> Duration {
    Duration::from_millis(500 * (1 << retries.min(6)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
