pub mod interface;
pub mod framer;
pub mod protocol;
pub mod types;

pub use interface::{SerialInterface, SerialConnector, DEFAULT_BAUD_RATE};
pub use framer::LineFramer;
pub use protocol::parse_line;
pub use types::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    /// "usb", "bluetooth", "pci" or "unknown"
    pub port_kind: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Byte-level access to one open serial link.
///
/// `SerialInterface` is the real implementation; tests substitute a scripted
/// in-memory port.
#[async_trait::async_trait]
pub trait SerialPortIO: Send {
    /// Write all of `data` and return the number of bytes written.
    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;

    /// Wait up to `timeout_ms` for bytes, then read everything currently
    /// available into `buffer`.
    ///
    /// Returns [`SerialError::Timeout`] when nothing arrived in time.
    /// Implementations must actually wait before timing out so callers can
    /// poll in a loop without spinning.
    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize>;

    /// Discard bytes buffered by the driver in both directions.
    async fn clear_buffers(&mut self) -> Result<()>;

    /// Release the underlying device. Further I/O fails with `NotConnected`.
    async fn close(&mut self);
}

/// Opens a [`SerialPortIO`] for a device identifier and baud rate.
#[async_trait::async_trait]
pub trait PortConnector: Send + Sync {
    async fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPortIO>>;
}
