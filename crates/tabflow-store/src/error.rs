use thiserror::Error;

/// Result type local to tabflow-store.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("store is closed")]
    Closed,
}

impl From<Error> for tabflow_core::Error {
    fn from(e: Error) -> Self {
        tabflow_core::Error::Store(e.to_string())
    }
}
