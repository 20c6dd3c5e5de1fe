//! Error types for rmiflash.

use std::io;
use thiserror::Error;

/// Result type for rmiflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rmiflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying device node.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No response within the allotted budget.
    #[error("Timeout: {0}")]
    TransportTimeout(String),

    /// Malformed frame, oversized payload or address overflow.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The flash function stayed busy past its idle-wait budget.
    #[error("Device busy: {0}")]
    DeviceBusyTimeout(String),

    /// The flash function went idle but reported a failure status.
    #[error("Flash status error 0x{0:02x}")]
    FlashStatus(u8),

    /// Device is not in the mode the operation requires.
    #[error("Not supported: {0}")]
    ModeMismatch(String),

    /// Permission-style failure while switching the link mode.
    #[error("Link denied: {0}")]
    LinkDenied(String),

    /// A function required for the operation is not in the function table.
    #[error("RMI function 0x{0:02x} not found")]
    FunctionNotFound(u8),

    /// An error with the failing step prepended.
    #[error("{context}: {source}")]
    Context {
        /// What was being done.
        context: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Return the innermost error, skipping any prepended context.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut err = self;
        while let Self::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Whether this error (ignoring context) is a transport timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::TransportTimeout(_))
    }

    /// Prepend a step description to this error.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension for prepending context to fallible results.
pub trait ResultExt<T> {
    /// Prepend a lazily built step description to the error, if any.
    fn context_with<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;

    /// Prepend a fixed step description to the error, if any.
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context_with<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }

    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}
