use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid operation ID: {0}")]
    InvalidOperationId(String),

    #[error("Invalid operation type: {0}")]
    InvalidOperationType(String),

    #[error("Invalid sync action: {0}")]
    InvalidAction(String),

    #[error("Invalid operation payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
