pub mod error;
pub mod limiter;
pub mod types;

pub use error::{ClientError, Result};
pub use limiter::RateLimiter;
pub use types::{FeedEntry, FeedPage, PostDetail};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry attempts for transient network failures per logical request.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff for transient retries. Actual delay is base * 2^attempt
/// plus random jitter (0-1s).
const RETRY_BASE: Duration = Duration::from_secs(2);

/// Rate-limit rejections are retried without consuming the transient budget;
/// this cap only guards against livelock if the remote throttles forever.
const RATE_LIMIT_MAX: u32 = 8;

pub struct MoltbookClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl MoltbookClient {
    pub fn new(base_url: &str, api_key: String, limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter,
        }
    }

    /// Fetch one page of a ranked feed. Consumes exactly one limiter slot
    /// per attempt.
    pub async fn fetch_feed_page(
        &self,
        feed: &str,
        limit: u32,
        offset: Option<u64>,
    ) -> Result<FeedPage> {
        let mut query = vec![("sort", feed.to_string()), ("limit", limit.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let body = self.get("/posts", &query).await?;
        FeedPage::from_value(body)
    }

    /// Fetch a post together with its complete nested reply tree.
    pub async fn fetch_post_detail(&self, post_id: &str) -> Result<PostDetail> {
        let body = self.get(&format!("/posts/{post_id}"), &[]).await?;
        PostDetail::from_value(body)
    }

    /// Fetch an agent profile by name. `NotFound` means the agent no longer
    /// exists remotely — callers record and skip, never treat as fatal.
    pub async fn fetch_agent_profile(&self, name: &str) -> Result<Value> {
        let body = self.get(&format!("/agents/{name}"), &[]).await?;
        // Profile may arrive wrapped in an envelope like the detail endpoint.
        Ok(body.get("agent").cloned().unwrap_or(body))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        let mut throttled = 0u32;

        loop {
            self.limiter.acquire().await;

            let resp = match self
                .client
                .get(&url)
                .query(query)
                .bearer_auth(&self.api_key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    let backoff = RETRY_BASE * 2u32.pow(attempt - 1);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                    warn!(
                        path,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    continue;
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                self.limiter.report_throttled(retry_after).await;
                throttled += 1;
                if throttled >= RATE_LIMIT_MAX {
                    return Err(ClientError::RateLimited { retry_after });
                }
                continue;
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ClientError::NotFound(path.to_string()));
            }
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            self.limiter.report_success().await;
            return resp
                .json::<Value>()
                .await
                .map_err(|e| ClientError::Malformed(e.to_string()));
        }
    }
}
