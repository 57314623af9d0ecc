use nusb::transfer::TransferError;
use std::array::TryFromSliceError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GoError>;

/// The primary error type for the `goio-lib` library.
#[derive(Error, Debug)]
pub enum GoError {
    #[error("Go! device not found at {0}")]
    DeviceNotFound(String),

    #[error("Go! device at {0} is already open")]
    DeviceBusy(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No response to command {cmd:#04x} within {waited_ms} ms")]
    Timeout { cmd: u8, waited_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Device rejected command {cmd:#04x} with status {status:#04x}")]
    ErrorResponse { cmd: u8, status: u8 },

    #[error("Expected response to command {expected:#04x}, got {actual:#04x}")]
    UnexpectedResponse { expected: u8, actual: u8 },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),
}

impl GoError {
    /// True for failures reported by, or decoded from, the device itself.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            GoError::ErrorResponse { .. }
                | GoError::UnexpectedResponse { .. }
                | GoError::InvalidPacket(_)
                | GoError::InvalidRecord(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GoError::Timeout { .. })
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, GoError::Io(_) | GoError::Transfer(_) | GoError::Transport(_))
    }
}

impl From<TryFromSliceError> for GoError {
    fn from(_: TryFromSliceError) -> Self {
        GoError::InvalidPacket("Failed to convert slice to array".to_string())
    }
}
