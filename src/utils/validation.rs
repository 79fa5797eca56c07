//! Input validation primitives.
//!
//! Provides ergonomic helpers for common validation patterns:
//! - Validating non-empty strings
//! - Validating identifier-shaped names
//!
//! These replace verbose Error::validation_invalid_argument chains.

use crate::core::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

/// Require a name that can be exported as an environment variable:
/// ASCII letters, digits, and underscores, not starting with a digit.
pub fn require_env_name<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = require_non_empty(value, field, "Name cannot be empty")?;

    let valid = !trimmed.starts_with(|c: char| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(trimmed)
    } else {
        Err(Error::validation_invalid_argument(
            field,
            format!(
                "'{}' is not a valid environment variable name (letters, digits, underscores; must not start with a digit)",
                trimmed
            ),
            Some(trimmed.to_string()),
            None,
        ))
    }
}
