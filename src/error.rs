use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Failure reported by a native driver implementation.
///
/// Driver crates construct these directly (message plus optional cause), so
/// they never need to depend on the full [`SqlTransactError`] taxonomy.
#[derive(Debug)]
pub struct DriverError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl DriverError {
    /// Driver failure described by a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Driver failure wrapping the native cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The driver's own description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for DriverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Errors surfaced by the transactional execution layer.
#[derive(Debug, Error)]
pub enum SqlTransactError {
    /// A native driver call failed (connectivity, syntax, constraint
    /// violation, ...). Carries the original cause.
    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),

    /// A caller precondition was violated before any native call was made.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// A stream read or write failed while binding or reading a large object.
    #[error("large-object stream I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be coerced to the requested type.
    #[error("cannot coerce {from} value `{value}` to {to}")]
    Coercion {
        /// Display form of the offending value.
        value: String,
        /// Kind of the stored value.
        from: &'static str,
        /// Target type requested by the caller.
        to: &'static str,
    },

    /// Anything that fits nowhere else (worker join failures and the like).
    #[error("other error: {0}")]
    Other(String),
}

impl SqlTransactError {
    /// Shorthand for an [`SqlTransactError::InvalidUsage`] with a formatted message.
    pub fn invalid_usage(message: impl Into<String>) -> Self {
        Self::InvalidUsage(message.into())
    }
}
