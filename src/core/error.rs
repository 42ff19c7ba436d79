use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Retention sweep failed: {0}")]
    Sweep(String),

    #[error("Snapshot store unavailable: {0}")]
    Store(String),

    #[error("No snapshots captured yet")]
    NotFound,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, WatchError>;
