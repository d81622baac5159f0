//! Error types for the icon cache

use thiserror::Error;

/// Result type for icon cache operations
pub type Result<T> = std::result::Result<T, IconCacheError>;

/// Errors that can occur in the icon cache
#[derive(Error, Debug)]
pub enum IconCacheError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent store error
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A persisted component identity that no longer parses
    #[error("malformed component name: {0}")]
    MalformedComponent(String),
}
