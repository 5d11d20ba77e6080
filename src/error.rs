//! Custom error types for quarry

use thiserror::Error;

/// Main error type for quarry operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Material not found: {0}")]
    MaterialNotFound(String),

    #[error("Material category not found: {0}")]
    CategoryNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Category {id} still holds {materials} material(s); delete them first")]
    CategoryInUse { id: i64, materials: i64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Image download failed: {0}")]
    ImageDownload(String),

    #[error("Not initialized: run 'quarry init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for lookups that came back empty
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::MaterialNotFound(_) | Error::CategoryNotFound(_) | Error::DocumentNotFound(_)
        )
    }
}

/// Result type alias for quarry
pub type Result<T> = std::result::Result<T, Error>;
