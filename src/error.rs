use thiserror::Error;

/// Fatal errors. Read paths never return these — they degrade to empty
/// results per the error-handling design. Only `open`, `close`, and the
/// watcher start/stop paths can fail.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index not open")]
    NotOpen,

    #[error("watcher unavailable: {0}")]
    WatcherUnavailable(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
