#![forbid(unsafe_code)]

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:9340";

/// Client-side knobs. Every field has an env override; unparsable values fall
/// back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Auto-hide delay for success/error banners.
    pub banner_ms: u64,
    /// Reconnect delay until the server sends its own `retry:`.
    pub stream_retry_ms: u64,
    pub peek_limit: usize,
    /// Capacity of the transport -> session frame channel.
    pub queue_cap: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 5_000,
            banner_ms: 3_000,
            stream_retry_ms: 3_000,
            peek_limit: 10,
            queue_cap: 1_024,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl ConsoleConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: std::env::var("MIRADOR_URL")
                .ok()
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(d.base_url),
            request_timeout_ms: env_or("MIRADOR_TIMEOUT_MS", d.request_timeout_ms),
            banner_ms: env_or("MIRADOR_BANNER_MS", d.banner_ms),
            stream_retry_ms: env_or("MIRADOR_STREAM_RETRY_MS", d.stream_retry_ms),
            peek_limit: clamp_peek_limit(env_or("MIRADOR_PEEK_LIMIT", d.peek_limit)),
            queue_cap: env_or("MIRADOR_QUEUE_CAP", d.queue_cap).max(1),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn banner_delay(&self) -> Duration {
        Duration::from_millis(self.banner_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_retry(&self) -> Duration {
        Duration::from_millis(self.stream_retry_ms)
    }
}

/// Peek limits outside [1, 100] are clamped.
pub fn clamp_peek_limit(n: usize) -> usize {
    n.clamp(1, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConsoleConfig::default();
        assert_eq!(c.banner_delay(), Duration::from_millis(3000));
        assert_eq!(c.peek_limit, 10);
        assert_eq!(c.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn base_url_is_normalised() {
        let c = ConsoleConfig::default().with_base_url("http://h:1/");
        assert_eq!(c.base_url, "http://h:1");
    }

    #[test]
    fn peek_limit_clamps() {
        assert_eq!(clamp_peek_limit(0), 1);
        assert_eq!(clamp_peek_limit(500), 100);
        assert_eq!(clamp_peek_limit(25), 25);
    }
}
