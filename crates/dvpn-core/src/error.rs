//! Error types for the node core.

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error type used for error chaining across crate boundaries.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Context wrapper that preserves an optional underlying source error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ErrorContext {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ErrorContext {
    /// Create context-only error (no underlying source).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create context error with an underlying source.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Node errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeError {
    /// No free address pair left in the configured range.
    #[error("Address pool exhausted")]
    PoolExhausted,

    /// An address pair was released that the pool never handed out.
    #[error("Address not allocated: {0}")]
    AddressNotAllocated(String),

    /// Tunnel backend control invocation failed or produced malformed output.
    #[error("Backend error: {0}")]
    Backend(#[source] ErrorContext),

    /// Ledger query failed or returned no data.
    #[error("Oracle error: {0}")]
    Oracle(#[source] ErrorContext),

    /// Usage or status write to the ledger collaborator failed.
    #[error("Settlement error: {0}")]
    Settlement(#[source] ErrorContext),

    /// Backend configuration could not be loaded or rendered.
    #[error("Configuration error: {0}")]
    Config(#[source] ErrorContext),

    /// An inbound connection request was refused (inactive subscription, exhausted quota).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A job task ended abnormally (panic or cancellation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NodeError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(ErrorContext::new(message))
    }

    pub fn backend_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend(ErrorContext::with_source(message, source))
    }

    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle(ErrorContext::new(message))
    }

    pub fn oracle_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Oracle(ErrorContext::with_source(message, source))
    }

    pub fn settlement(message: impl Into<String>) -> Self {
        Self::Settlement(ErrorContext::new(message))
    }

    pub fn settlement_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Settlement(ErrorContext::with_source(message, source))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(ErrorContext::new(message))
    }

    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Config(ErrorContext::with_source(message, source))
    }

    /// Returns true if this error must stop the node.
    ///
    /// **Caller-scoped (not fatal):**
    /// - `PoolExhausted` - surfaced to the connecting client only
    /// - `Rejected` - subscription or quota check refused a connection
    ///
    /// Everything else terminates the job that hit it; restart is the
    /// supervisor's job. A job that hits a caller-scoped error logs it and
    /// waits for its next tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NodeError::PoolExhausted | NodeError::Rejected(_))
    }
}

/// Result type alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
