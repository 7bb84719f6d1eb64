pub mod serial;
pub mod device;
pub mod config;

pub use device::{CommandChannel, ConnectionState, DeviceCommand, LinkOptions, LinkSession, Thresholds};
pub use serial::{InboundMessage, SensorRecord, DeviceResponse, SerialError};

/// Install the `env_logger` backend for the `log` facade.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_logging(default_level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}
