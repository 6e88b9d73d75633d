//! # Error Types
//!
//! Errors raised by the foundational types. Domain crates wrap these in
//! their own `thiserror` enums rather than stringifying them.

use thiserror::Error;

/// Validation failure for a foundational value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A calendar month could not be constructed or parsed.
    #[error("invalid month: {0}")]
    InvalidMonth(String),

    /// A timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A monetary amount could not be parsed or is out of range.
    #[error("invalid amount {amount:?}: {reason}")]
    InvalidAmount {
        /// The offending input as given.
        amount: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An identifier could not be parsed.
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    /// Amounts must be decimal strings or integers.
    #[error("float values are not permitted in canonical representations; use a decimal string: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Error loading or validating [`SettlementConfig`](crate::SettlementConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was being read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment override could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidOverride {
        /// Environment variable name.
        var: String,
        /// Raw value that failed to parse.
        value: String,
    },

    /// A field is outside its permitted range.
    #[error("invalid config field {field}: {reason}")]
    OutOfRange {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
