//! Error types for the migration domain.

use std::fmt;
use thiserror::Error;

/// Two or more canonical assets that resolve to the same storage key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCollision {
    /// The storage key they all map to.
    pub key_base: String,
    /// Every canonical URL mapping to `key_base`, sorted.
    pub canonical_urls: Vec<String>,
}

impl fmt::Display for KeyCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.key_base, self.canonical_urls.join(", "))
    }
}

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid asset URL: {0}")]
    InvalidUrl(String),

    #[error(
        "key collisions detected, use --key-suffix sha8 to disambiguate: {}",
        format_collisions(.0)
    )]
    KeyCollision(Vec<KeyCollision>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_collisions(collisions: &[KeyCollision]) -> String {
    collisions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
