// ── Gateway Engine: HTTP Client & Reconnect Backoff ─────────────────────────
//
// Shared utilities used by the session lifecycle and the Evolution API client.
//
// Features:
//   • Reconnect backoff: fixed base delay doubling on consecutive failures, capped
//   • Shared reqwest::Client factory with connect/request timeouts
//   • UTF-8 safe log previews for upstream response bodies

use crate::atoms::constants::{RECONNECT_BASE_SECS, RECONNECT_MAX_EXPONENT, RECONNECT_MAX_SECS};
use crate::atoms::error::EngineResult;
use reqwest::Client;
use std::time::Duration;

// ── Reconnect backoff ──────────────────────────────────────────────────────

/// Delay schedule for reconnecting a session after a transient close.
///
/// The first attempt waits `base`; every consecutive failure doubles the wait
/// up to `max`. A successful open resets the attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(RECONNECT_BASE_SECS),
            max: Duration::from_secs(RECONNECT_MAX_SECS),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base) }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.pow(attempt.min(RECONNECT_MAX_EXPONENT));
        self.base.saturating_mul(factor).min(self.max)
    }
}

// ── Client factory ─────────────────────────────────────────────────────────

/// Build the `reqwest::Client` shared by every Evolution API call.
pub fn build_http_client() -> EngineResult<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

// ── Log helpers ────────────────────────────────────────────────────────────

/// Truncate `text` to at most `max` bytes without splitting a UTF-8 character.
pub fn preview(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reconnect_uses_base_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
    }

    #[test]
    fn reconnect_delay_doubles_then_caps() {
        let policy = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(40));
        assert_eq!(policy.delay(4), Duration::from_secs(60));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn max_never_below_base() {
        let policy = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(3), Duration::from_secs(5));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello", 3), "hel");
        // "é" is two bytes; cutting at 1 must back off to 0.
        assert_eq!(preview("é", 1), "");
    }

    #[test]
    fn http_client_builds() {
        assert!(build_http_client().is_ok());
    }
}
