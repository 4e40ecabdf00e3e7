// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected HTTP status from a third-party API
    #[error("HTTP status {status} from {context}")]
    Status { context: String, status: u16 },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Dedup database failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Tabular export failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Page payload did not contain a usable catalog
    #[error("Extraction error: {0}")]
    Extract(String),

    /// Cookie service failure
    #[error("Cookie provider error: {0}")]
    Cookies(String),

    /// Notification channel failure
    #[error("Notification error for {channel}: {message}")]
    Notify { channel: String, message: String },

    /// Result export failure
    #[error("Export error: {0}")]
    Export(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an extraction error.
    pub fn extract(message: impl Into<String>) -> Self {
        Self::Extract(message.into())
    }

    /// Create a cookie provider error.
    pub fn cookies(message: impl Into<String>) -> Self {
        Self::Cookies(message.into())
    }

    /// Create a notification error with the channel name.
    pub fn notify(channel: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Notify {
            channel: channel.into(),
            message: message.to_string(),
        }
    }

    /// Create an export error.
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export(message.into())
    }

    /// Create an unexpected-status error.
    pub fn status(context: impl Into<String>, status: u16) -> Self {
        Self::Status {
            context: context.into(),
            status,
        }
    }
}
