use std::io::{Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, SerialPortType, StopBits};
use tokio::time::timeout;

use super::{PortConnector, Result, SerialDeviceInfo, SerialError, SerialPortIO};

// JDY-31 modules ship configured for 9600 baud
pub const DEFAULT_BAUD_RATE: u32 = 9600;

const PORT_TIMEOUT_MS: u64 = 1000;
const POLL_SLEEP_MS: u64 = 5;

pub struct SerialInterface {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialInterface {
    /// List every serial port the OS currently reports
    pub fn available_ports() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            let mut device = SerialDeviceInfo {
                port_name: port.port_name.clone(),
                port_kind: "unknown".to_string(),
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            };
            match port.port_type {
                SerialPortType::UsbPort(usb_info) => {
                    device.port_kind = "usb".to_string();
                    device.vid = Some(usb_info.vid);
                    device.pid = Some(usb_info.pid);
                    device.serial_number = usb_info.serial_number;
                    device.manufacturer = usb_info.manufacturer;
                    device.product = usb_info.product;
                }
                SerialPortType::BluetoothPort => device.port_kind = "bluetooth".to_string(),
                SerialPortType::PciPort => device.port_kind = "pci".to_string(),
                SerialPortType::Unknown => {}
            }
            devices.push(device);
        }

        Ok(devices)
    }

    /// Open `port_name` as 8 data bits, no parity, 1 stop bit
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        if port_name.trim().is_empty() {
            return Err(SerialError::PortNotFound(port_name.to_string()));
        }

        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(PORT_TIMEOUT_MS))
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self { port: Some(port) })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(SerialError::NotConnected)
    }
}

#[async_trait::async_trait]
impl SerialPortIO for SerialInterface {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port_mut()?;
        port.write_all(data).map_err(SerialError::IoError)?;
        port.flush().map_err(SerialError::IoError)?;
        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let port = self.port_mut()?;

        let read_operation = async {
            loop {
                match port.bytes_to_read() {
                    Ok(0) => {
                        tokio::time::sleep(Duration::from_millis(POLL_SLEEP_MS)).await;
                    }
                    Ok(available) => {
                        let wanted = (available as usize).min(buffer.len());
                        match port.read(&mut buffer[..wanted]) {
                            Ok(bytes_read) => return Ok(bytes_read),
                            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                            Err(e) => return Err(SerialError::IoError(e)),
                        }
                    }
                    Err(e) => return Err(SerialError::SerialportError(e)),
                }
            }
        };

        timeout(Duration::from_millis(timeout_ms), read_operation)
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    async fn clear_buffers(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed serial port");
        }
    }
}

/// [`PortConnector`] backed by real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

#[async_trait::async_trait]
impl PortConnector for SerialConnector {
    async fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPortIO>> {
        let port_name = port_name.to_string();
        // opening can block on some Bluetooth stacks while the link is paged
        let interface = tokio::task::spawn_blocking(move || SerialInterface::open(&port_name, baud_rate))
            .await
            .map_err(|e| SerialError::ConnectionFailed(format!("open task failed: {}", e)))??;
        Ok(Box::new(interface))
    }
}
