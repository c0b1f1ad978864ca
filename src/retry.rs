//! Backoff and retry helpers for external service calls.
//!
//! Client-level retries are independent of event redelivery: a client
//! exhausts its own bounded budget first, and only then does the failure
//! surface to the handler for redelivery by the event source.

use std::time::Duration;

/// Parse a Retry-After header value (seconds).
/// Returns the duration to wait, or None if the header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(60)))
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms * 2u64.pow(attempt.min(16));
    Duration::from_millis(delay_ms.min(60_000))
}

/// Get a delay from an environment variable, with default fallback.
pub fn delay_from_env(env_var: &str, default_ms: u64) -> Duration {
    std::env::var(env_var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            parse_retry_after(Some("5")),
            Some(Duration::from_secs(5))
        );
        assert_eq!(parse_retry_after(Some("nope")), None);
        assert_eq!(parse_retry_after(None), None);
        // Capped at 60 seconds
        assert_eq!(
            parse_retry_after(Some("3600")),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_backoff_delay_grows() {
        assert_eq!(backoff_delay(0, 1000), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, 1000), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, 1000), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_delay_capped() {
        assert_eq!(backoff_delay(20, 1000), Duration::from_millis(60_000));
    }
}
