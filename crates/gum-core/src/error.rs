//! Error types for gum-core

use thiserror::Error;

/// Errors reported by a [`Transport`](crate::Transport) implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The line is not open
    #[error("transport is not open")]
    NotOpen,

    /// Failed to open the requested port
    #[error("failed to open {port} at {baud} baud: {reason}")]
    OpenFailed {
        /// Port identifier
        port: String,
        /// Requested baud rate
        baud: u32,
        /// Underlying reason
        reason: String,
    },

    /// No answer within the allotted time
    #[error("transport timeout")]
    Timeout,

    /// The device answered with a malformed or unexpected frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error on the underlying line
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or querying firmware metadata
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Symbol is not present in the table
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Macro is not present or has the wrong shape
    #[error("unknown or non-integer macro: {0}")]
    UnknownMacro(String),

    /// A build macro holds a value that does not fit its field
    #[error("build macro {name} out of range: {value}")]
    BuildFieldOutOfRange {
        /// Macro name
        name: &'static str,
        /// Offending value
        value: i64,
    },

    /// RON parsing error
    #[error("metadata parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// I/O error while reading an archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
