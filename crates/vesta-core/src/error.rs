//! Error types for vesta-core.

use thiserror::Error;

/// Result type for vesta-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vesta-core.
///
/// Declined trust, an unresolvable kernel and an empty batch are not errors;
/// those requests complete with `Ok(())`.
#[derive(Debug, Error)]
pub enum Error {
    /// A kernel rejected an execute or cancel request.
    #[error("kernel {kernel_id} failed: {message}")]
    Kernel { kernel_id: String, message: String },

    /// A kernel discovery source action failed.
    #[error("source action failed: {0}")]
    SourceAction(String),

    /// A command invoked on behalf of the orchestrator failed.
    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },

    /// The orchestrator has been disposed.
    #[error("orchestrator disposed")]
    Disposed,
}

impl Error {
    /// Build a kernel failure for the given kernel id.
    pub fn kernel(kernel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Kernel {
            kernel_id: kernel_id.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_error_display() {
        let err = Error::kernel("python3", "process exited");
        assert_eq!(err.to_string(), "kernel python3 failed: process exited");
    }
}
