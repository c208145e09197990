pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
#[error("transport error")]
pub enum AppError {
    /// The link or conn is permanently closed. No retry is meaningful.
    #[error("transport closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    DetailedIo(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("conn id collision")]
    IdCollision,

    #[error("reconnect not supported")]
    NotSupported,

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// marker error
    Incomplete,
}

impl AppError {
    /// True for errors that mean the resource is gone for good, as opposed
    /// to a transient or per-operation failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, AppError::Closed)
    }
}
