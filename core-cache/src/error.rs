use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Entry of {size} bytes exceeds cache budget of {max} bytes")]
    SizeExceeded { size: u64, max: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote error: {0}")]
    Remote(#[from] BridgeError),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown entry type: {0}")]
    UnknownEntryType(String),

    #[error("A warm pass is already running")]
    WarmInProgress,

    #[error("Cache store has not been initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, CacheError>;
