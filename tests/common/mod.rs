//! Scripted in-memory serial port for driving `LinkSession` without hardware
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btlink_monitor_lib::serial::{PortConnector, Result, SerialError, SerialPortIO};

#[derive(Default)]
struct PortState {
    inbox: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    read_error: Option<String>,
    fail_writes: bool,
    write_delay: Option<Duration>,
    closed: bool,
    clears: usize,
}

/// Test-side handle onto one opened mock port
#[derive(Clone, Default)]
pub struct PortScript {
    state: Arc<Mutex<PortState>>,
}

impl PortScript {
    /// Queue bytes; each call is delivered by a separate read
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.lock().unwrap().inbox.push_back(bytes.to_vec());
    }

    pub fn fail_next_read(&self, message: &str) {
        self.state.lock().unwrap().read_error = Some(message.to_string());
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    /// Make every write take `delay` before it lands
    pub fn stall_writes(&self, delay: Duration) {
        self.state.lock().unwrap().write_delay = Some(delay);
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().written).into_owned()
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.written().lines().map(str::to_string).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn clears(&self) -> usize {
        self.state.lock().unwrap().clears
    }
}

pub struct MockPort {
    script: PortScript,
}

#[async_trait]
impl SerialPortIO for MockPort {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let delay = self.script.state.lock().unwrap().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.script.state.lock().unwrap();
        if state.closed {
            return Err(SerialError::NotConnected);
        }
        if state.fail_writes {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write failed",
            )));
        }
        state.written.extend_from_slice(data);
        Ok(data.len())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        {
            let mut state = self.script.state.lock().unwrap();
            if state.closed {
                return Err(SerialError::NotConnected);
            }
            if let Some(message) = state.read_error.take() {
                return Err(SerialError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    message,
                )));
            }
            if let Some(mut chunk) = state.inbox.pop_front() {
                let n = chunk.len().min(buffer.len());
                buffer[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.inbox.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
        }
        tokio::time::sleep(Duration::from_millis(timeout_ms.clamp(1, 5))).await;
        Err(SerialError::Timeout)
    }

    async fn clear_buffers(&mut self) -> Result<()> {
        let mut state = self.script.state.lock().unwrap();
        state.inbox.clear();
        state.clears += 1;
        Ok(())
    }

    async fn close(&mut self) {
        self.script.state.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
struct ConnectorState {
    opened: Vec<(String, u32, PortScript)>,
    refuse: Option<String>,
}

/// Hands out a fresh `MockPort` per `open` and remembers each one
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(reason: &str) -> Self {
        let connector = Self::default();
        connector.state.lock().unwrap().refuse = Some(reason.to_string());
        connector
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    pub fn opened(&self, index: usize) -> (String, u32, PortScript) {
        self.state.lock().unwrap().opened[index].clone()
    }

    /// Script of the most recently opened port
    pub fn port(&self) -> PortScript {
        let state = self.state.lock().unwrap();
        state.opened.last().map(|(_, _, script)| script.clone()).expect("no port opened")
    }
}

#[async_trait]
impl PortConnector for MockConnector {
    async fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPortIO>> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.refuse {
            return Err(SerialError::ConnectionFailed(format!("{}: {}", port_name, reason)));
        }
        let script = PortScript::default();
        state.opened.push((port_name.to_string(), baud_rate, script.clone()));
        Ok(Box::new(MockPort { script }))
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
