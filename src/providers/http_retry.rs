//! Retry wrapper for idempotent provider reads.
//!
//! Listing and metadata calls go through `send_with_retry()`, which retries on
//! 429 and 5xx with exponential backoff and honours a numeric `Retry-After`.
//! 401/403/404 pass straight through: an expired token must surface to the
//! caller, not be hammered.

use reqwest::{Client, Request, Response};
use std::time::Duration;

/// Retry policy for provider reads
#[derive(Debug, Clone)]
pub struct HttpRetryConfig {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl HttpRetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Numeric `Retry-After` only, capped at five minutes.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(300)))
}

/// Backoff for `attempt` with 10-30% jitter.
fn calculate_delay(attempt: u32, config: &HttpRetryConfig) -> Duration {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
    Duration::from_millis((capped + jitter) as u64)
}

/// Execute `request`, retrying on 429/5xx.
///
/// The request is rebuilt from its method, URL, headers and (buffered) body
/// for each retry, so streaming bodies must not be passed here.
pub async fn send_with_retry(
    client: &Client,
    request: Request,
    config: &HttpRetryConfig,
) -> Result<Response, reqwest::Error> {
    let method = request.method().clone();
    let url = request.url().clone();
    let headers = request.headers().clone();
    let body = request.body().and_then(|b| b.as_bytes()).map(|b| b.to_vec());

    let mut response = client.execute(request).await?;

    for attempt in 0..config.max_retries {
        let status = response.status().as_u16();
        if !is_retryable_status(status) {
            break;
        }

        let delay = parse_retry_after(&response).unwrap_or_else(|| calculate_delay(attempt, config));
        // url may carry a page token; log the path only
        tracing::debug!(
            "{} {} returned {}, retry {}/{} in {:?}",
            method,
            url.path(),
            status,
            attempt + 1,
            config.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;

        let mut retry = client.request(method.clone(), url.clone()).headers(headers.clone());
        if let Some(ref bytes) = body {
            retry = retry.body(bytes.clone());
        }
        response = retry.send().await?;
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_status() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }

    #[test]
    fn test_calculate_delay_bounded() {
        let config = HttpRetryConfig::default();
        for attempt in 0..10 {
            let delay = calculate_delay(attempt, &config);
            assert!(delay.as_millis() <= (config.max_delay_ms as u128 * 13 / 10));
            assert!(delay.as_millis() >= config.base_delay_ms as u128);
        }
    }

    #[test]
    fn test_with_max_retries() {
        let config = HttpRetryConfig::with_max_retries(0);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.base_delay_ms, 1000);
    }
}
