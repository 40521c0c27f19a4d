use thiserror::Error;

/// Failure reported by a command handler.
///
/// The `Display` text becomes the `message` of the error envelope, so
/// [`HandlerError::Failed`] renders its message verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The `params` object did not match the handler's arguments.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),
    /// The handler panicked; the payload is carried when it was a string.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Builds a [`HandlerError::Failed`] from any displayable cause.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
