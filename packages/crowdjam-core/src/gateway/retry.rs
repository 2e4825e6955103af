//! Retry logic for transient gateway errors.
//!
//! Provides exponential backoff for requests that fail with timeouts,
//! connection errors, rate limits or 5xx responses.

use std::future::Future;
use std::time::Duration;

use super::GatewayResult;
use crate::protocol_constants::GATEWAY_RETRY_DELAYS_MS;

/// Executes a gateway request with retry logic for transient errors.
///
/// Retries with exponential backoff (200ms, 500ms, 1000ms). Permanent errors
/// are returned immediately.
///
/// # Arguments
/// * `action` - Action name for logging
/// * `operation` - Closure that performs the request
pub(crate) async fn with_retry<T, F, Fut>(action: &str, mut operation: F) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < GATEWAY_RETRY_DELAYS_MS.len() => {
                let delay_ms = GATEWAY_RETRY_DELAYS_MS[attempt];
                attempt += 1;
                log::warn!(
                    "[Gateway] {} transient error: {} (retry {}/{} in {}ms)",
                    action,
                    e,
                    attempt,
                    GATEWAY_RETRY_DELAYS_MS.len(),
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
