//! Messages decoded from the device line protocol
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Timestamp layout used for readings in the history file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One temperature/humidity reading. The timestamp is the host capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    #[serde(with = "local_timestamp")]
    pub timestamp: DateTime<Local>,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
}

impl SensorRecord {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self { timestamp: Local::now(), temperature, humidity }
    }
}

/// Free-text acknowledgement or debug line sent with the `RESP:` prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub text: String,
    #[serde(with = "local_timestamp")]
    pub timestamp: DateTime<Local>,
}

impl DeviceResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), timestamp: Local::now() }
    }
}

/// Classification of a single line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Sensor(SensorRecord),
    Response(DeviceResponse),
    Unrecognized(String),
    Empty,
}

impl ParsedLine {
    /// The message to hand to consumers, if this line carries one
    pub fn into_inbound(self) -> Option<InboundMessage> {
        match self {
            ParsedLine::Sensor(record) => Some(InboundMessage::Sensor(record)),
            ParsedLine::Response(response) => Some(InboundMessage::Response(response)),
            ParsedLine::Unrecognized(_) | ParsedLine::Empty => None,
        }
    }
}

/// Entries of the session's inbound queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundMessage {
    Sensor(SensorRecord),
    Response(DeviceResponse),
}

/// Counters published by the receive loop
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkMetrics {
    pub bytes_read: u64,
    pub lines_read: u64,
    pub sensor_records: u64,
    pub device_responses: u64,
    pub unrecognized_lines: u64,
    pub oversized_lines_dropped: u64,
    pub utf8_decode_errors: u64,
    pub commands_written: u64,
    pub write_failures: u64,
    pub last_error: Option<String>,
}

mod local_timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(value: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map_err(serde::de::Error::custom)?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time: {}", raw)))
    }
}
