use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::{LinkSession, Result, Thresholds};

/// Commands understood by the sensor firmware
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Connect,
    Disconnect,
    GetData,
    SetThreshold(Thresholds),
    /// Arbitrary text, sent as-is
    Raw(String),
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Connect => f.write_str("CONNECT"),
            DeviceCommand::Disconnect => f.write_str("DISCONNECT"),
            DeviceCommand::GetData => f.write_str("GET_DATA"),
            DeviceCommand::SetThreshold(t) => write!(
                f,
                "SET_THRESHOLD,{},{},{},{}",
                decimal(t.temp_min),
                decimal(t.temp_max),
                decimal(t.hum_min),
                decimal(t.hum_max)
            ),
            DeviceCommand::Raw(text) => f.write_str(text),
        }
    }
}

/// Whole numbers keep one decimal place ("18.0"), as the firmware expects
fn decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Formats device commands and hands them to a [`LinkSession`]
pub struct CommandChannel<'a> {
    session: &'a LinkSession,
}

impl<'a> CommandChannel<'a> {
    pub fn new(session: &'a LinkSession) -> Self {
        Self { session }
    }

    pub async fn send(&self, command: DeviceCommand) {
        self.session.send(&command.to_string()).await;
    }

    pub async fn send_raw(&self, text: &str) {
        self.send(DeviceCommand::Raw(text.to_string())).await;
    }

    /// Ask the device for an immediate reading
    pub async fn request_data(&self) {
        self.send(DeviceCommand::GetData).await;
    }

    /// Send each non-blank line of `script`, trimmed, waiting `pace` between
    /// writes. Returns the number of lines sent.
    pub async fn send_script(&self, script: &str, pace: Duration) -> usize {
        let lines: Vec<&str> = script.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        for (i, line) in lines.iter().enumerate() {
            if i > 0 && !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
            log::info!("Sending line {}/{}", i + 1, lines.len());
            self.send_raw(line).await;
        }
        lines.len()
    }

    /// [`send_script`](Self::send_script) with the contents of a UTF-8 text file
    pub async fn send_file(&self, path: impl AsRef<Path>, pace: Duration) -> Result<usize> {
        let script = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(self.send_script(&script, pace).await)
    }

    /// Push alert thresholds. Invalid ranges are rejected before anything is
    /// written.
    pub async fn set_thresholds(&self, thresholds: &Thresholds) -> Result<()> {
        thresholds.validate()?;
        self.send(DeviceCommand::SetThreshold(*thresholds)).await;
        Ok(())
    }

    /// Fails with `NotConnected` unless the session has a live link
    pub fn ensure_connected(&self) -> Result<()> {
        if self.session.is_connected() {
            Ok(())
        } else {
            Err(super::DeviceError::NotConnected)
        }
    }
}
