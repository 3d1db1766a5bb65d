use thiserror::Error;

/// Engine error taxonomy.
///
/// Backend failures arrive as `anyhow::Error` through the device interface
/// and are wrapped transparently; configuration and capacity problems are
/// caught before any device work is issued.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("dataset of {len} elements exceeds the sort capacity of {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
