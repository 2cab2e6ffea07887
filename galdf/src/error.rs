use galcore::GalcoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] GalcoreError),

    /// A required table row is absent, e.g. the box size header
    #[error("Missing data: {message}")]
    Missing { message: String },
}

pub type Result<T> = std::result::Result<T, DataError>;

impl DataError {
    pub fn missing(message: impl Into<String>) -> Self {
        Self::Missing {
            message: message.into(),
        }
    }
}
