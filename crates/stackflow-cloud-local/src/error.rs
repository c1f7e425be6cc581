//! Local provider error types

use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Invalid properties for {kind}: {message}")]
    InvalidProperties { kind: String, message: String },

    #[error("Invalid resource kind: {0}")]
    InvalidKind(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Kind of {id} is {actual}, cannot change to {requested} in place")]
    KindMismatch {
        id: String,
        actual: String,
        requested: String,
    },

    #[error("Inventory is corrupted: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LocalError>;

impl From<LocalError> for CloudError {
    fn from(error: LocalError) -> Self {
        match error {
            LocalError::InvalidProperties { .. } | LocalError::InvalidKind(_) => {
                CloudError::Schema(error.to_string())
            }
            LocalError::ResourceNotFound(id) => CloudError::ResourceNotFound(id),
            LocalError::KindMismatch { .. } => CloudError::ProviderRejected(error.to_string()),
            // Disk trouble on the provider side may clear up on retry
            LocalError::IoError(e) => CloudError::ProviderUnavailable(e.to_string()),
            LocalError::JsonError(e) => CloudError::ProviderRejected(e.to_string()),
        }
    }
}
