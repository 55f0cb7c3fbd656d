use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config_validator::ConfigValidator;
use crate::error::{RatelimitError, RatelimitResult};

/// Default bound on route key length.
pub const DEFAULT_ROUTE_KEY_CAPACITY: usize = 256;

const DEFAULT_HEADER_PREFIX: &str = "x-ratelimit-";

/// Names of the response headers the engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HeaderNames {
    #[validate(length(min = 1))]
    pub bucket: String,
    #[validate(length(min = 1))]
    pub limit: String,
    #[validate(length(min = 1))]
    pub remaining: String,
    #[validate(length(min = 1))]
    pub reset: String,
    #[validate(length(min = 1))]
    pub reset_after: String,
    #[validate(length(min = 1))]
    pub global: String,
    #[validate(length(min = 1))]
    pub date: String,
}

impl HeaderNames {
    /// Header set with every ratelimit header under `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            bucket: format!("{}bucket", prefix),
            limit: format!("{}limit", prefix),
            remaining: format!("{}remaining", prefix),
            reset: format!("{}reset", prefix),
            reset_after: format!("{}reset-after", prefix),
            global: format!("{}global", prefix),
            date: "date".to_string(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.bucket.as_str(),
            self.limit.as_str(),
            self.remaining.as_str(),
            self.reset.as_str(),
            self.reset_after.as_str(),
            self.global.as_str(),
            self.date.as_str(),
        ]
        .into_iter()
    }
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_HEADER_PREFIX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RatelimitConfig {
    /// Maximum length of a generated route key
    #[validate(range(min = 16, max = 4096))]
    pub route_key_capacity: usize,

    /// Response headers consulted when populating buckets
    #[validate(nested)]
    pub headers: HeaderNames,

    /// Default log level for the `rest_ratelimit` target
    pub log_level: String,
}

impl Default for RatelimitConfig {
    fn default() -> Self {
        Self {
            route_key_capacity: DEFAULT_ROUTE_KEY_CAPACITY,
            headers: HeaderNames::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RatelimitConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> RatelimitResult<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("RATELIMIT_ROUTE_KEY_CAPACITY") {
            config.route_key_capacity = capacity.trim().parse().map_err(|_| {
                RatelimitError::Configuration(format!(
                    "RATELIMIT_ROUTE_KEY_CAPACITY must be an integer, got '{}'",
                    capacity
                ))
            })?;
        }

        if let Ok(level) = std::env::var("RATELIMIT_LOG_LEVEL") {
            config.log_level = level.trim().to_lowercase();
        }

        if let Ok(prefix) = std::env::var("RATELIMIT_HEADER_PREFIX") {
            config.headers = HeaderNames::with_prefix(&prefix.trim().to_lowercase());
        }

        config.validated()
    }

    /// Parse configuration from a JSON document
    pub fn from_json_str(json: &str) -> RatelimitResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validated()
    }

    /// Run field and semantic validation, returning the config on success
    pub fn validated(self) -> RatelimitResult<Self> {
        self.validate()?;
        ConfigValidator::validate_log_level(&self.log_level)?;
        for name in self.headers.iter() {
            ConfigValidator::validate_header_name(name)?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RatelimitConfig::default().validated().unwrap();
        assert_eq!(config.route_key_capacity, DEFAULT_ROUTE_KEY_CAPACITY);
        assert_eq!(config.headers.bucket, "x-ratelimit-bucket");
        assert_eq!(config.headers.reset_after, "x-ratelimit-reset-after");
        assert_eq!(config.headers.date, "date");
    }

    #[test]
    fn test_from_json_partial() {
        let config = RatelimitConfig::from_json_str(r#"{"route_key_capacity": 64}"#).unwrap();
        assert_eq!(config.route_key_capacity, 64);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_from_json_rejects_small_capacity() {
        let result = RatelimitConfig::from_json_str(r#"{"route_key_capacity": 4}"#);
        assert!(matches!(result, Err(RatelimitError::Validation(_))));
    }

    #[test]
    fn test_from_json_rejects_bad_header() {
        let result =
            RatelimitConfig::from_json_str(r#"{"headers": {"bucket": "x ratelimit bucket"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_header_prefix() {
        let headers = HeaderNames::with_prefix("x-rl-");
        assert_eq!(headers.remaining, "x-rl-remaining");
        assert_eq!(headers.iter().count(), 7);
    }
}
