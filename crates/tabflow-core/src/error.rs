use thiserror::Error;

/// Canonical result for core and everything built on it.
pub type Result<T> = std::result::Result<T, Error>;

/// Row-level failure reported by a [`Caster`](crate::cast::Caster).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot cast field '{field}': {message}")]
pub struct CastError {
    pub field: String,
    pub message: String,
}

impl CastError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Bad processor arguments or ambiguous mappings. Raised before rows flow
    /// whenever the problem is visible from metadata alone.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error("validation failed in resource '{resource}' at row {row_index}: {cause}")]
    Validation {
        resource: String,
        row_index: usize,
        cause: CastError,
    },

    #[error("errored in processor {name} in position #{position}: {source}")]
    Processor {
        name: String,
        position: usize,
        source: Box<Error>,
    },

    /// An aggregator was fed values it cannot combine.
    #[error("aggregation failed: {0}")]
    Aggregate(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Attribute this error to the processor at `position`. An error that is
    /// already attributed is returned unchanged.
    pub fn in_processor(self, name: &str, position: usize) -> Self {
        match self {
            Error::Processor { .. } => self,
            cause => Error::Processor {
                name: name.to_string(),
                position,
                source: Box::new(cause),
            },
        }
    }

    /// The innermost error, skipping processor attribution.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Processor { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self.root_cause(), Error::Config(_))
    }
}
