//! Error types for the gum driver

use gum_core::{MetadataError, TransportError};
use thiserror::Error;

use crate::connection::Gum;

/// Driver errors
#[derive(Debug, Error)]
pub enum Error {
    /// No metadata has been resolved for this connection yet
    #[error("not connected")]
    NotConnected,

    /// No candidate source produced usable metadata
    #[error("no metadata found for the connected firmware")]
    MetadataNotFound,

    /// Symbol is not present in the active metadata
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Macro is not present in the active metadata
    #[error("unknown or non-integer macro: {0}")]
    UnknownMacro(String),

    /// Other metadata problem
    #[error("metadata error: {0}")]
    Metadata(MetadataError),

    /// Payload is longer than the symbol it is written to
    #[error("write of {len} bytes overflows symbol {name} ({size} bytes)")]
    SymbolWriteOverflow {
        /// Symbol name
        name: String,
        /// Symbol size
        size: usize,
        /// Payload length
        len: usize,
    },

    /// Symbol is too wide to be read as an integer
    #[error("symbol {name} ({size} bytes) does not fit an integer")]
    SymbolTooWide {
        /// Symbol name
        name: String,
        /// Symbol size
        size: usize,
    },

    /// Symbol has no shadow copy in the debug window
    #[error("not a debug-copy symbol: {0}")]
    NotADebugSymbol(String),

    /// More arguments than the execution slot carries
    #[error("too many arguments for remote call: {0} (max 4)")]
    TooManyArguments(usize),

    /// The device never reported completion of a remote call
    #[error("remote call to word address 0x{function:04X} did not complete")]
    RemoteCallFailed {
        /// Word address of the called function
        function: u32,
    },

    /// The bootloader did not greet us
    #[error("bootloader handshake failed (got {0:02X?})")]
    BootloaderHandshakeFailure(Option<u8>),

    /// Firmware image is empty or does not fit
    #[error("firmware image size {size} out of range (1..={max})")]
    ImageSizeError {
        /// Image size in bytes
        size: usize,
        /// Largest accepted size
        max: usize,
    },

    /// The bootloader did not confirm the written image
    #[error("bootloader did not confirm the image (got {0:02X?})")]
    FlashConfirmationFailure(Option<u8>),

    /// Handle was issued by a different connection manager
    ///
    /// The handle is handed back untouched so it can be released on its
    /// own manager.
    #[error("handle does not belong to this connection manager")]
    ForeignHandle(Gum),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connection cache could not be written
    #[error("connection cache error: {0}")]
    Cache(String),

    /// Settings could not be loaded
    #[error("settings error: {0}")]
    Settings(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MetadataError> for Error {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::UnknownSymbol(name) => Self::UnknownSymbol(name),
            MetadataError::UnknownMacro(name) => Self::UnknownMacro(name),
            other => Self::Metadata(other),
        }
    }
}

/// Result type for driver operations
pub type Result<T> = core::result::Result<T, Error>;
