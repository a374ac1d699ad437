//! Shared HTTP client for the scraper and the downloader.
//!
//! Bank sites throttle aggressively and sit behind CDNs that answer 502/503
//! during deploys. Both kinds of response, and connection-level failures,
//! are retried with a linear backoff; anything else (404, 403) fails at once
//! because retrying cannot change it.

use crate::config::PipelineConfig;
use crate::error::TarifarioError;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff unit between HTTP attempts: 2 s, 4 s, …
const HTTP_BACKOFF: Duration = Duration::from_secs(2);

/// A configured `reqwest::Client` with retry.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    attempts: u32,
    backoff: Duration,
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503)
}

impl HttpClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, TarifarioError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| TarifarioError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            attempts: config.http_attempts.max(1),
            backoff: HTTP_BACKOFF,
        })
    }

    /// Override the backoff unit (tests use milliseconds).
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// GET `url`, returning the first successful response.
    ///
    /// The error string is suitable for a report record.
    pub async fn get(&self, url: &str) -> Result<Response, String> {
        let mut last_err = String::new();
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                let wait = self.backoff * (attempt - 1);
                warn!(
                    "{}: retry {}/{} after {:?} ({})",
                    url, attempt, self.attempts, wait, last_err
                );
                tokio::time::sleep(wait).await;
            }

            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("GET {} → {}", url, resp.status());
                    return Ok(resp);
                }
                Ok(resp) if is_retryable_status(resp.status()) => {
                    last_err = format!("HTTP {}", resp.status());
                }
                Ok(resp) => return Err(format!("HTTP {}", resp.status())),
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    last_err = e.to_string();
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Err(last_err)
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, TarifarioError> {
        let fail = |reason: String| TarifarioError::FetchFailed {
            url: url.to_string(),
            reason,
        };
        let resp = self.get(url).await.map_err(fail)?;
        resp.text().await.map_err(|e| fail(e.to_string()))
    }
}
