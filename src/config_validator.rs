use http::HeaderName;

use crate::error::RatelimitError;

/// Semantic checks the derive-based validation can't express
pub struct ConfigValidator;

impl ConfigValidator {
    const LOG_LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    /// Header names must be valid and lowercase, since lookups are exact
    pub fn validate_header_name(name: &str) -> Result<(), RatelimitError> {
        if name.is_empty() {
            return Err(RatelimitError::Validation(
                "Header name cannot be empty".to_string(),
            ));
        }

        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(RatelimitError::Validation(format!(
                "Invalid header name '{}'",
                name
            )));
        }

        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(RatelimitError::Validation(format!(
                "Header name '{}' must be lowercase",
                name
            )));
        }

        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<(), RatelimitError> {
        if !Self::LOG_LEVELS.contains(&level) {
            return Err(RatelimitError::Validation(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level,
                Self::LOG_LEVELS
            )));
        }

        Ok(())
    }
}
