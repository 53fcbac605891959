//! HTTP fetch capability with retry.

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::config::WorkerConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// User agent sent with every download.
pub const USER_AGENT: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body and content type of a fetched asset.
#[derive(Clone, Debug)]
pub struct FetchedAsset {
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download failed: {status}")]
    Status { status: reqwest::StatusCode },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Source of original asset bytes.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// One GET. Non-2xx responses are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError>;
}

/// Fetches assets over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(FetchedAsset { body, content_type })
    }
}

/// Attempt cap and exponential backoff for downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            base_delay: config.backoff_base(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2x base, 4x base...
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Fetch with retries. Every error, including non-2xx, is retried until the
/// attempt cap; the last error is returned.
pub async fn fetch_with_retry(
    fetcher: &dyn AssetFetcher,
    url: &str,
    policy: RetryPolicy,
) -> Result<FetchedAsset, FetchError> {
    let mut attempt = 1;
    loop {
        match fetcher.fetch(url).await {
            Ok(asset) => return Ok(asset),
            Err(err) if attempt >= policy.attempts => return Err(err),
            Err(err) => {
                let delay = policy.delay(attempt);
                warn!(
                    url = %url,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "download failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails a fixed number of times, then succeeds.
    struct FlakyFetcher {
        failures: Mutex<u32>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl AssetFetcher for FlakyFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedAsset, FetchError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(FetchError::Status {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                });
            }
            Ok(FetchedAsset {
                body: Bytes::from_static(b"ok"),
                content_type: None,
            })
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay(1), Duration::from_millis(300));
        assert_eq!(policy.delay(2), Duration::from_millis(600));
        assert_eq!(policy.delay(3), Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let fetcher = FlakyFetcher {
            failures: Mutex::new(2),
            calls: Mutex::new(0),
        };
        let asset = fetch_with_retry(&fetcher, "https://cdn.example/a.png", policy(3))
            .await
            .unwrap();
        assert_eq!(asset.body, Bytes::from_static(b"ok"));
        assert_eq!(*fetcher.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_cap() {
        let fetcher = FlakyFetcher {
            failures: Mutex::new(5),
            calls: Mutex::new(0),
        };
        let err = fetch_with_retry(&fetcher, "https://cdn.example/a.png", policy(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("502"));
        assert_eq!(*fetcher.calls.lock().unwrap(), 3);
    }
}
