//! Validation error types and field checks shared by every domain model

use std::fmt;

/// Validation error for domain models
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Field is empty when it shouldn't be
    Empty { field: &'static str },

    /// Field exceeds maximum length
    TooLong { field: &'static str, max: usize },

    /// String doesn't match required format
    InvalidFormat { field: &'static str, reason: &'static str },

    /// Invalid enum variant
    InvalidVariant { field: &'static str, value: String },

    /// Numeric value outside its allowed range
    OutOfRange { field: &'static str, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty { field } => write!(f, "{} cannot be empty", field),
            Self::TooLong { field, max } => {
                write!(f, "{} exceeds maximum length of {} characters", field, max)
            }
            Self::InvalidFormat { field, reason } => {
                write!(f, "{}: {}", field, reason)
            }
            Self::InvalidVariant { field, value } => {
                write!(f, "invalid {} value: '{}'", field, value)
            }
            Self::OutOfRange { field, reason } => write!(f, "{} {}", field, reason),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Trim and check a required text field.
pub fn required(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    bounded(field, trimmed, max)
}

/// Check an optional text field, returning it unchanged when within bounds.
pub fn bounded(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(value.to_owned())
}

/// Like [`bounded`] for `Option<String>` inputs; empty strings collapse to `None`.
pub fn optional(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => bounded(field, v, max).map(Some),
    }
}

/// Reject negative or non-finite amounts.
pub fn non_negative(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::OutOfRange {
            field,
            reason: "must be a non-negative number".into(),
        });
    }
    Ok(value)
}

/// Require a probability in `0.0..=1.0`.
pub fn probability(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field,
            reason: "must be between 0 and 1".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ValidationError::TooLong {
            field: "title",
            max: 200,
        };
        assert_eq!(
            err.to_string(),
            "title exceeds maximum length of 200 characters"
        );
    }

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("owner", "  alice ", 100).unwrap(), "alice");
        assert_eq!(
            required("owner", "   ", 100),
            Err(ValidationError::Empty { field: "owner" })
        );
    }

    #[test]
    fn length_counts_chars_not_bytes() {
        let s = "é".repeat(100);
        assert!(bounded("name", &s, 100).is_ok());
        assert!(bounded("name", &format!("{s}x"), 100).is_err());
    }

    #[test]
    fn optional_collapses_empty() {
        assert_eq!(optional("asset", Some("  "), 10).unwrap(), None);
        assert_eq!(optional("asset", None, 10).unwrap(), None);
        assert_eq!(optional("asset", Some("db"), 10).unwrap(), Some("db".into()));
    }

    #[test]
    fn probability_bounds() {
        assert!(probability("vuln", 0.0).is_ok());
        assert!(probability("vuln", 1.0).is_ok());
        assert!(probability("vuln", 1.01).is_err());
        assert!(non_negative("tef", -0.1).is_err());
        assert!(non_negative("tef", f64::NAN).is_err());
    }
}
