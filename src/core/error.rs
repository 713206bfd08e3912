use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid connection string '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Bind group '{0}' not found")]
    UnknownGroup(String),

    #[error("Stale routing context: {0}")]
    StaleContext(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// True for errors that must abort process start-up.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidUrl { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for RouterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
