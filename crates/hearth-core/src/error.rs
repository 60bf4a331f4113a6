//! Unified error handling for Hearth.
//!
//! Every crate keeps its own error enum for precise matching and converts
//! into this type at crate boundaries.

/// Unified error type for Hearth.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration file could not be read or decoded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration was readable but semantically invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Device or driver errors.
    #[error("Device error: {0}")]
    Device(String),

    /// Network-related errors.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Not found errors.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Parse errors with location context.
    #[error("Parse error at {location}: {message}")]
    Parse { location: String, message: String },
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Builds an [`Error::Validation`] from a message or format string.
#[macro_export]
macro_rules! validation_err {
    ($msg:expr) => {
        $crate::error::Error::Validation($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Validation(format!($fmt, $($arg)*))
    };
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<crate::expr::ExprError> for Error {
    fn from(e: crate::expr::ExprError) -> Self {
        match e {
            crate::expr::ExprError::Parse { position, message } => Error::Parse {
                location: format!("column {}", position + 1),
                message,
            },
            crate::expr::ExprError::DivisionByZero => Error::Validation(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_formats_message() {
        let err = validation_err!("duplicate device name '{}'", "heater");
        assert_eq!(
            err.to_string(),
            "Validation error: duplicate device name 'heater'"
        );
    }

    #[test]
    fn test_expr_error_conversion_keeps_position() {
        let err: Error = crate::expr::ExprError::Parse {
            position: 3,
            message: "unexpected character 'x'".into(),
        }
        .into();
        match err {
            Error::Parse { location, message } => {
                assert_eq!(location, "column 4");
                assert!(message.contains("'x'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
