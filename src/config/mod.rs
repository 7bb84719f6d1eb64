pub mod store;

pub use store::{ConfigStore, HistoryStore, MonitorConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] crate::device::DeviceError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
