// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Gallerist

use thiserror::Error;

use crate::reference::ParseError;

/// Result type alias for Gallerist operations
pub type Result<T> = std::result::Result<T, GalleristError>;

/// Gallerist error types
#[derive(Error, Debug)]
pub enum GalleristError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("There are only {count} attachments; {} is an invalid attachment number", .index + 1)]
    Range { index: usize, count: usize },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("{0} is still running")]
    ConcurrencyConflict(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl GalleristError {
    /// Wrap transport and storage failures as `ExternalService`, leaving the
    /// domain variants untouched.
    pub fn into_external(self, context: &str) -> Self {
        match self {
            Self::FileSystem(_) | Self::Http(_) | Self::Database(_) | Self::Json(_) | Self::Decode(_) => {
                Self::ExternalService(format!("{}: {}", context, self))
            }
            other => other,
        }
    }

    /// Whether this error means a referenced object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ParseError> for GalleristError {
    fn from(err: ParseError) -> Self {
        Self::NotFound(format!("message link: {}", err))
    }
}
