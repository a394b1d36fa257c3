//! HTTP client for the odds provider
//!
//! Fetches raw odds payloads per sport, following pagination and retrying
//! transient failures. Payloads are returned as opaque JSON for the
//! normalizer.

use super::rate_limit::{BackoffPolicy, RateLimiter};
use super::OddsProvider;
use crate::config::ProviderConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const QUOTA_HEADER: &str = "x-requests-remaining";

/// Odds provider client
pub struct OddsApiClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_key_header: Option<String>,
    query: BTreeMap<String, String>,
    max_pages: u32,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
}

impl OddsApiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_key_header: config.api_key_header.clone(),
            query: config.query.clone(),
            max_pages: config.max_pages.max(1),
            limiter: RateLimiter::new(Duration::from_millis(config.min_request_interval_ms)),
            backoff: BackoffPolicy::from_config(config),
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn remaining_quota(&self) -> Option<u64> {
        self.limiter.remaining_quota().await
    }

    /// Fetch every page for one sport
    async fn fetch_sport(&self, sport: &str) -> std::result::Result<Vec<Value>, ClientError> {
        let mut pages = Vec::new();
        let mut page = 1;

        loop {
            let payload = self.get_with_retry(sport, page).await?;
            let next = next_page(&payload, page);
            pages.push(payload);

            match next {
                Some(n) if n <= self.max_pages => page = n,
                Some(n) => {
                    warn!(sport, next_page = n, max_pages = self.max_pages, "Page limit reached, remaining pages skipped");
                    break;
                }
                None => break,
            }
        }

        debug!(sport, pages = pages.len(), "Fetched odds");
        Ok(pages)
    }

    async fn get_with_retry(&self, sport: &str, page: u32) -> std::result::Result<Value, ClientError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            match self.get_once(sport, page).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_retryable() && attempt + 1 < self.backoff.max_attempts => {
                    let mut delay = self.backoff.delay(attempt);
                    if let ClientError::RateLimited { retry_after_secs: Some(secs) } = &e {
                        delay = delay.max(Duration::from_secs(*secs));
                    }
                    warn!(
                        sport,
                        page,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Odds request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, sport: &str, page: u32) -> std::result::Result<Value, ClientError> {
        let url = format!("{}/sports/{}/odds", self.base_url, sport);
        let mut request = self.http.get(&url).query(&self.query);

        if page > 1 {
            request = request.query(&[("page", page)]);
        }
        request = match &self.api_key_header {
            Some(header) => request.header(header.as_str(), &self.api_key),
            None => request.query(&[("apiKey", &self.api_key)]),
        };

        let resp = request
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if let Some(remaining) = header_u64(resp.headers(), QUOTA_HEADER) {
            self.limiter.record_quota(remaining).await;
        }

        if !status.is_success() {
            let retry_after_secs = header_u64(resp.headers(), RETRY_AFTER.as_str());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after_secs, body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| ClientError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl OddsProvider for OddsApiClient {
    async fn fetch_snapshot(&self, sports: &[String]) -> std::result::Result<Vec<Value>, ClientError> {
        let results = join_all(sports.iter().map(|sport| self.fetch_sport(sport))).await;

        let mut payloads = Vec::new();
        let mut worst: Option<ClientError> = None;
        for (sport, result) in sports.iter().zip(results) {
            match result {
                Ok(pages) => payloads.extend(pages),
                Err(e) => {
                    warn!(sport = %sport, "Dropping sport for this cycle: {}", e);
                    if worst.as_ref().map_or(true, |w| e.severity() > w.severity()) {
                        worst = Some(e);
                    }
                }
            }
        }

        match worst {
            Some(e) if payloads.is_empty() => Err(e),
            _ => Ok(payloads),
        }
    }
}

fn classify_status(status: StatusCode, retry_after_secs: Option<u64>, body: String) -> ClientError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited { retry_after_secs },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized {
            status: status.as_u16(),
        },
        s if s.is_server_error() => ClientError::Unavailable(format!("HTTP {}", s.as_u16())),
        s => ClientError::Rejected {
            status: s.as_u16(),
            body: body.chars().take(200).collect(),
        },
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Next page number advertised by a paginated payload
fn next_page(payload: &Value, current: u32) -> Option<u32> {
    let obj = payload.as_object()?;

    if let Some(next) = obj.get("next_page").and_then(Value::as_u64) {
        return (next as u32 > current).then_some(next as u32);
    }

    let total = obj
        .get("meta")
        .and_then(|m| m.get("total_pages"))
        .or_else(|| obj.get("total_pages"))
        .and_then(Value::as_u64)?;

    (u64::from(current) < total).then_some(current + 1)
}
