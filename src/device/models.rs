use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::serial::framer::DEFAULT_MAX_LINE_LEN;
use crate::serial::SensorRecord;
use super::{DeviceError, Result};

/// Link session state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Unrecoverable I/O error; the session cleans up and returns to `Disconnected`
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// The currently open serial link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub port_name: String,
    pub baud_rate: u32,
    pub is_open: bool,
    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            port_name: port_name.to_string(),
            baud_rate,
            is_open: true,
            opened_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Alert thresholds pushed to the device with SET_THRESHOLD
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    pub temp_min: f64,
    pub temp_max: f64,
    pub hum_min: f64,
    pub hum_max: f64,
}

impl Thresholds {
    /// Build thresholds, rejecting empty or inverted ranges
    pub fn new(temp_min: f64, temp_max: f64, hum_min: f64, hum_max: f64) -> Result<Self> {
        let thresholds = Self { temp_min, temp_max, hum_min, hum_max };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        // written as !(a < b) so NaN bounds are rejected too
        if !(self.temp_min < self.temp_max) {
            return Err(DeviceError::InvalidConfiguration(format!(
                "temperature minimum ({}) must be below maximum ({})",
                self.temp_min, self.temp_max
            )));
        }
        if !(self.hum_min < self.hum_max) {
            return Err(DeviceError::InvalidConfiguration(format!(
                "humidity minimum ({}) must be below maximum ({})",
                self.hum_min, self.hum_max
            )));
        }
        Ok(())
    }

    /// Compare a reading against both ranges
    pub fn evaluate(&self, record: &SensorRecord) -> ReadingStatus {
        ReadingStatus {
            temperature: Level::classify(record.temperature, self.temp_min, self.temp_max),
            humidity: Level::classify(record.humidity, self.hum_min, self.hum_max),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_min: 18.0,
            temp_max: 30.0,
            hum_min: 30.0,
            hum_max: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Level {
    Low,
    Normal,
    High,
}

impl Level {
    fn classify(value: f64, min: f64, max: f64) -> Self {
        if value < min {
            Level::Low
        } else if value > max {
            Level::High
        } else {
            Level::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingStatus {
    pub temperature: Level,
    pub humidity: Level,
}

impl ReadingStatus {
    pub fn in_range(&self) -> bool {
        self.temperature == Level::Normal && self.humidity == Level::Normal
    }
}

/// Timing and buffering knobs for a [`LinkSession`](super::LinkSession)
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Wait after opening the port before talking to the module
    pub settle_delay: Duration,
    /// Pause after CONNECT / DISCONNECT so the device can react
    pub command_grace: Duration,
    /// Longest the receive loop waits for bytes per iteration
    pub poll_interval: Duration,
    pub max_line_len: usize,
    /// How long `send` waits for the I/O task to confirm a write
    pub write_timeout: Duration,
    /// Upper bound on waiting for the receive task during disconnect
    pub shutdown_timeout: Duration,
}

impl LinkOptions {
    /// No settle or grace delays; for scripted ports
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            command_grace: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            ..Self::default()
        }
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
            command_grace: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            write_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_reject_inverted_ranges() {
        assert!(Thresholds::new(18.0, 30.0, 30.0, 80.0).is_ok());
        assert!(matches!(
            Thresholds::new(30.0, 30.0, 30.0, 80.0),
            Err(DeviceError::InvalidConfiguration(_))
        ));
        assert!(Thresholds::new(18.0, 30.0, 90.0, 80.0).is_err());
        assert!(Thresholds::new(f64::NAN, 30.0, 30.0, 80.0).is_err());
    }

    #[test]
    fn test_evaluate_reading() {
        let thresholds = Thresholds::default();
        let status = thresholds.evaluate(&SensorRecord::new(17.5, 85.0));
        assert_eq!(status.temperature, Level::Low);
        assert_eq!(status.humidity, Level::High);
        assert!(!status.in_range());

        let status = thresholds.evaluate(&SensorRecord::new(30.0, 30.0));
        assert!(status.in_range());
    }
}
