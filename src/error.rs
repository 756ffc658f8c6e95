//! Custom error types for rustpapers.
//!
//! This module defines all error types used throughout the pipeline.
//! All functions return `Result<T, PapersError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rustpapers operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum PapersError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code from API
        code: i32,
        /// Error message from API
        message: String,
    },

    /// No field or subfield in the topic index matched the requested topic
    #[error("No OpenAlex field or subfield matches topic '{0}'")]
    TopicNotFound(String),

    /// A page of results could not be fetched after exhausting retries.
    /// Pages loaded before the failure stay committed.
    #[error("Page {page} failed after {attempts} attempts: {message}")]
    Fetch {
        /// 1-based page number that failed
        page: i32,
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// A raw work record cannot be normalized (missing/empty identifier)
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A single row was rejected by the papers table; the batch continues
    #[error("Failed to load {openalex_id}: {message}")]
    Load {
        /// Deduplication key of the rejected row
        openalex_id: String,
        /// Constraint violation detail
        message: String,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using `PapersError`
pub type Result<T> = std::result::Result<T, PapersError>;
