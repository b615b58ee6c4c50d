use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum ClusterError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Kubernetes API request failed: {operation}")]
    RequestFailed { operation: String },
}

impl Error for ClusterError {}

impl ClusterError {
    pub(crate) fn request(operation: impl Into<String>) -> Self {
        Self::RequestFailed {
            operation: operation.into(),
        }
    }
}
