use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Node is detached from the UI tree: {0}")]
    NodeDetached(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Element bounds are empty or invalid: {0}")]
    InvalidBounds(String),

    #[error("Failed to launch application: {0}")]
    LaunchFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
