use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

use btlink_monitor_lib::config::store::{DEFAULT_CONFIG_FILE, DEFAULT_HISTORY_FILE};
use btlink_monitor_lib::config::{ConfigStore, HistoryStore};
use btlink_monitor_lib::device::{Level, ReadingStatus};
use btlink_monitor_lib::serial::{SerialInterface, TIMESTAMP_FORMAT};
use btlink_monitor_lib::{InboundMessage, LinkOptions, LinkSession, SensorRecord, Thresholds};

const DRAIN_INTERVAL_MS: u64 = 100;

#[derive(Parser)]
#[command(name = "btlink-monitor")]
#[command(version)]
#[command(about = "Monitor a JDY-31 Bluetooth temperature/humidity sensor over a serial port")]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Reading history file
    #[arg(long, global = true, default_value = DEFAULT_HISTORY_FILE)]
    history: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,
    /// Connect and print readings as they arrive
    Monitor(MonitorArgs),
    /// Send one raw command line, or every line of a file, and print the replies
    Send {
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        command: Option<String>,
        /// Send each non-blank line of this file instead
        #[arg(long)]
        file: Option<PathBuf>,
        /// Gap between lines when sending a file
        #[arg(long, default_value_t = 500)]
        pace_ms: u64,
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        /// How long to wait for replies
        #[arg(long, default_value_t = 1500)]
        wait_ms: u64,
    },
    /// Interactive session: each line typed is sent, device output is printed
    Console {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
    },
    /// Validate and store alert thresholds, optionally pushing them to the device
    Thresholds {
        #[arg(allow_negative_numbers = true)]
        temp_min: f64,
        #[arg(allow_negative_numbers = true)]
        temp_max: f64,
        hum_min: f64,
        hum_max: f64,
        /// Also send SET_THRESHOLD to the device
        #[arg(long)]
        push: bool,
    },
    /// Show stored readings, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Delete all stored readings
        #[arg(long)]
        clear: bool,
    },
    /// Show or change saved settings
    Config {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        #[arg(long)]
        auto_connect: Option<bool>,
    },
}

#[derive(Args, Default)]
struct MonitorArgs {
    /// Serial port; defaults to the saved one
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Send GET_DATA at this interval
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    btlink_monitor_lib::init_logging(log::LevelFilter::Info);
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Ports) => list_ports(),
        Some(Commands::Monitor(args)) => monitor(&cli.config, &cli.history, args).await,
        Some(Commands::Send { command, file, pace_ms, port, baud, wait_ms }) => {
            let payload = match file {
                Some(path) => Payload::File(path, Duration::from_millis(pace_ms)),
                None => Payload::Line(command.unwrap_or_default()),
            };
            send_once(&cli.config, payload, port, baud, wait_ms).await
        }
        Some(Commands::Console { port, baud }) => console(&cli.config, port, baud).await,
        Some(Commands::Thresholds { temp_min, temp_max, hum_min, hum_max, push }) => {
            let thresholds = Thresholds::new(temp_min, temp_max, hum_min, hum_max)?;
            store_thresholds(&cli.config, thresholds, push).await
        }
        Some(Commands::History { limit, clear }) => show_history(&cli.history, limit, clear),
        Some(Commands::Config { ref port, baud, auto_connect }) => {
            edit_config(&cli.config, port.clone(), baud, auto_connect)
        }
        None => {
            let store = ConfigStore::open(&cli.config);
            if store.config().auto_connect {
                log::info!("auto_connect is set, starting monitor on {}", store.config().port);
                monitor(&cli.config, &cli.history, MonitorArgs::default()).await
            } else {
                println!("No command given. Run with --help for usage.");
                Ok(())
            }
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = SerialInterface::available_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let description = match (&port.manufacturer, &port.product) {
            (Some(m), Some(p)) => format!("{} {}", m, p),
            (Some(d), None) | (None, Some(d)) => d.clone(),
            (None, None) => String::new(),
        };
        println!("{:<24} {:<10} {}", port.port_name, port.port_kind, description);
    }
    Ok(())
}

async fn connect_from_config(
    store: &mut ConfigStore,
    port: Option<String>,
    baud: Option<u32>,
) -> Result<LinkSession> {
    let port = port.unwrap_or_else(|| store.config().port.clone());
    let baud = baud.unwrap_or(store.config().baud_rate);

    let session = LinkSession::serial(LinkOptions::default());
    session
        .connect(&port, baud)
        .await
        .with_context(|| format!("could not connect to {} at {} baud", port, baud))?;

    store.update(|c| {
        c.port = port.clone();
        c.baud_rate = baud;
    });
    if let Err(e) = store.save() {
        log::warn!("Could not save config: {}", e);
    }
    Ok(session)
}

async fn monitor(config_path: &Path, history_path: &Path, args: MonitorArgs) -> Result<()> {
    let mut store = ConfigStore::open(config_path);
    let mut history = HistoryStore::open(history_path);
    let session = connect_from_config(&mut store, args.port, args.baud).await?;
    let thresholds = store.config().thresholds;

    println!("Monitoring, press Ctrl-C to stop");
    let deadline = args.duration_secs.map(|s| Instant::now() + Duration::from_secs(s));
    let mut drain = interval(Duration::from_millis(DRAIN_INTERVAL_MS));
    let mut request = args.interval_ms.map(|ms| {
        let mut timer = interval(Duration::from_millis(ms.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Stopping");
                break;
            }
            _ = next_tick(&mut request) => {
                session.commands().request_data().await;
            }
            _ = drain.tick() => {
                for message in session.drain_inbound() {
                    print_message(&message, &thresholds);
                    if let InboundMessage::Sensor(record) = message {
                        if let Err(e) = history.push(record) {
                            log::warn!("Could not save history: {}", e);
                        }
                    }
                }
                if !session.is_connected() {
                    let reason = session.last_error().unwrap_or_else(|| "link closed".to_string());
                    eprintln!("Disconnected: {}", reason);
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    history.save().context("could not save history")?;
    Ok(())
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

enum Payload {
    Line(String),
    File(PathBuf, Duration),
}

async fn send_once(
    config_path: &Path,
    payload: Payload,
    port: Option<String>,
    baud: Option<u32>,
    wait_ms: u64,
) -> Result<()> {
    let mut store = ConfigStore::open(config_path);
    let thresholds = store.config().thresholds;
    let session = connect_from_config(&mut store, port, baud).await?;

    match payload {
        Payload::Line(line) => session.commands().send_raw(&line).await,
        Payload::File(path, pace) => {
            let sent = session.commands().send_file(&path, pace).await;
            match sent {
                Ok(count) => println!("Sent {} lines from {}", count, path.display()),
                Err(e) => {
                    session.disconnect().await;
                    return Err(e).with_context(|| format!("could not send {}", path.display()));
                }
            }
        }
    }
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    for message in session.drain_inbound() {
        print_message(&message, &thresholds);
    }

    session.disconnect().await;
    Ok(())
}

async fn console(config_path: &Path, port: Option<String>, baud: Option<u32>) -> Result<()> {
    let mut store = ConfigStore::open(config_path);
    let thresholds = store.config().thresholds;
    let session = connect_from_config(&mut store, port, baud).await?;

    println!("Type a line and press Enter to send it; 'quit' or Ctrl-D exits");
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut drain = interval(Duration::from_millis(DRAIN_INTERVAL_MS));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = input.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                        break;
                    }
                    if !line.is_empty() {
                        session.commands().send_raw(line).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Could not read stdin: {}", e);
                    break;
                }
            },
            _ = drain.tick() => {
                for message in session.drain_inbound() {
                    print_message(&message, &thresholds);
                }
                if !session.is_connected() {
                    let reason = session.last_error().unwrap_or_else(|| "link closed".to_string());
                    eprintln!("Disconnected: {}", reason);
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

async fn store_thresholds(config_path: &Path, thresholds: Thresholds, push: bool) -> Result<()> {
    let mut store = ConfigStore::open(config_path);
    store.set_thresholds(thresholds)?;
    store.save().context("could not save config")?;
    println!(
        "Thresholds saved: {:.1}-{:.1} °C, {:.1}-{:.1} %",
        thresholds.temp_min, thresholds.temp_max, thresholds.hum_min, thresholds.hum_max
    );

    if push {
        let session = connect_from_config(&mut store, None, None).await?;
        let commands = session.commands();
        commands.ensure_connected()?;
        commands.set_thresholds(&thresholds).await?;
        println!("Thresholds sent to device");
        session.disconnect().await;
    }
    Ok(())
}

fn show_history(history_path: &Path, limit: usize, clear: bool) -> Result<()> {
    let mut history = HistoryStore::open(history_path);
    if clear {
        history.clear().context("could not clear history")?;
        println!("History cleared");
        return Ok(());
    }
    if history.is_empty() {
        println!("No history");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<10}", "Time", "Temp(°C)", "Hum(%)");
    println!("{}", "-".repeat(40));
    for record in history.recent(limit).iter().rev() {
        println!(
            "{:<20} {:<10.1} {:<10.1}",
            record.timestamp.format(TIMESTAMP_FORMAT),
            record.temperature,
            record.humidity
        );
    }
    Ok(())
}

fn edit_config(
    config_path: &Path,
    port: Option<String>,
    baud: Option<u32>,
    auto_connect: Option<bool>,
) -> Result<()> {
    let mut store = ConfigStore::open(config_path);
    let changed = port.is_some() || baud.is_some() || auto_connect.is_some();
    store.update(|c| {
        if let Some(port) = port {
            c.port = port;
        }
        if let Some(baud) = baud {
            c.baud_rate = baud;
        }
        if let Some(auto_connect) = auto_connect {
            c.auto_connect = auto_connect;
        }
    });
    if changed || !store.exists() {
        store.save().context("could not save config")?;
    }
    println!("{}", serde_json::to_string_pretty(store.config())?);
    Ok(())
}

fn print_message(message: &InboundMessage, thresholds: &Thresholds) {
    match message {
        InboundMessage::Sensor(record) => print_reading(record, thresholds.evaluate(record)),
        InboundMessage::Response(response) => println!(
            "{}  device: {}",
            response.timestamp.format(TIMESTAMP_FORMAT),
            response.text
        ),
    }
}

fn print_reading(record: &SensorRecord, status: ReadingStatus) {
    let flag = |level: Level| match level {
        Level::Low => " LOW",
        Level::Normal => "",
        Level::High => " HIGH",
    };
    println!(
        "{}  {:>5.1} °C{}  {:>5.1} %{}",
        record.timestamp.format(TIMESTAMP_FORMAT),
        record.temperature,
        flag(status.temperature),
        record.humidity,
        flag(status.humidity)
    );
}
