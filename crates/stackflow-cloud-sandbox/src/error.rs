//! Sandbox provider error types

use stackflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox account file is corrupt: {path}: {message}")]
    CorruptAccount { path: String, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

impl From<SandboxError> for CloudError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::CloudError(e) => e,
            SandboxError::IoError(e) => CloudError::Io(e),
            SandboxError::JsonError(e) => CloudError::Json(e),
            e @ SandboxError::CorruptAccount { .. } => CloudError::StateError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
