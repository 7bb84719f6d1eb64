use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::serial::{
    parse_line, InboundMessage, LineFramer, LinkMetrics, ParsedLine, PortConnector,
    SerialConnector, SerialError, SerialPortIO,
};
use super::{CommandChannel, ConnectionInfo, ConnectionState, DeviceCommand, LinkOptions};

const READ_BUFFER_SIZE: usize = 512;
const REQUEST_CAPACITY: usize = 16;

/// Requests handled by the link's I/O task
enum LinkRequest {
    Write {
        line: String,
        responder: oneshot::Sender<crate::serial::Result<usize>>,
    },
    Shutdown {
        farewell: Option<String>,
        responder: oneshot::Sender<()>,
    },
}

struct ActiveLink {
    info: Arc<StdMutex<ConnectionInfo>>,
    request_tx: mpsc::Sender<LinkRequest>,
    task: JoinHandle<()>,
}

/// Owns at most one serial link to the sensor device.
///
/// The open port lives inside a dedicated tokio task that runs the receive
/// loop and performs every write, so the port handle is never shared with
/// callers. `connect`, `disconnect` and `send` are serialized by the session.
/// Decoded messages are queued in arrival order and drained with
/// [`poll_inbound`](Self::poll_inbound).
pub struct LinkSession {
    connector: Box<dyn PortConnector>,
    options: LinkOptions,
    link: Mutex<Option<ActiveLink>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    metrics_tx: Arc<watch::Sender<LinkMetrics>>,
    last_error: Arc<StdMutex<Option<String>>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: StdMutex<mpsc::UnboundedReceiver<InboundMessage>>,
}

impl LinkSession {
    pub fn new(connector: impl PortConnector + 'static, options: LinkOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (metrics_tx, _) = watch::channel(LinkMetrics::default());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            connector: Box::new(connector),
            options,
            link: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            metrics_tx: Arc::new(metrics_tx),
            last_error: Arc::new(StdMutex::new(None)),
            inbound_tx,
            inbound_rx: StdMutex::new(inbound_rx),
        }
    }

    /// Session over real serial ports
    pub fn serial(options: LinkOptions) -> Self {
        Self::new(SerialConnector, options)
    }

    /// Open `port_name`, announce ourselves with CONNECT and start receiving.
    ///
    /// An existing link is disconnected first. Only failures to open or
    /// configure the port are reported; a failed CONNECT write is logged.
    pub async fn connect(&self, port_name: &str, baud_rate: u32) -> crate::serial::Result<()> {
        let mut link = self.link.lock().await;
        if let Some(active) = link.take() {
            log::info!("Already connected, closing previous link before connecting to {}", port_name);
            self.shutdown_link(active).await;
        }

        set_state(&self.state_tx, ConnectionState::Connecting);
        log::info!("Connecting to {} at {} baud", port_name, baud_rate);

        let mut io = match self.connector.open(port_name, baud_rate).await {
            Ok(io) => io,
            Err(e) => return Err(self.connect_failed(e)),
        };

        if !self.options.settle_delay.is_zero() {
            sleep(self.options.settle_delay).await;
        }

        // drop whatever the module buffered before we were listening
        if let Err(e) = io.clear_buffers().await {
            io.close().await;
            return Err(self.connect_failed(e));
        }

        let mut metrics = LinkMetrics::default();
        match write_line(&mut *io, &DeviceCommand::Connect.to_string()).await {
            Ok(_) => metrics.commands_written += 1,
            Err(e) => {
                log::warn!("Failed to send CONNECT to {}: {}", port_name, e);
                metrics.write_failures += 1;
            }
        }
        self.metrics_tx.send_replace(metrics);

        if !self.options.command_grace.is_zero() {
            sleep(self.options.command_grace).await;
        }

        let info = Arc::new(StdMutex::new(ConnectionInfo::new(port_name, baud_rate)));
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let task = IoTask {
            io,
            framer: LineFramer::with_max_line_len(self.options.max_line_len),
            requests: request_rx,
            inbound_tx: self.inbound_tx.clone(),
            state_tx: self.state_tx.clone(),
            metrics_tx: self.metrics_tx.clone(),
            last_error: self.last_error.clone(),
            info: info.clone(),
            poll_timeout_ms: self.options.poll_interval.as_millis().max(1) as u64,
            command_grace: self.options.command_grace,
        };

        *lock(&self.last_error) = None;
        set_state(&self.state_tx, ConnectionState::Connected);
        let task = tokio::spawn(task.run());
        *link = Some(ActiveLink { info, request_tx, task });

        log::info!("Connected to {}", port_name);
        Ok(())
    }

    /// Say DISCONNECT, stop the receive loop and close the port.
    ///
    /// Safe to call repeatedly; does nothing when no link is open.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        match link.take() {
            Some(active) => self.shutdown_link(active).await,
            None => set_state(&self.state_tx, ConnectionState::Disconnected),
        }
    }

    /// Write `command` followed by a newline.
    ///
    /// Delivery is best effort: when disconnected or when the write fails the
    /// command is dropped and the failure is only logged.
    pub async fn send(&self, command: &str) {
        let link = self.link.lock().await;
        let Some(active) = link.as_ref() else {
            log::warn!("Not connected, dropping command {:?}", command);
            return;
        };
        if !self.is_connected() {
            log::warn!("Link is down, dropping command {:?}", command);
            return;
        }

        let (responder, response) = oneshot::channel();
        let request = LinkRequest::Write { line: command.to_string(), responder };
        if active.request_tx.send(request).await.is_err() {
            log::warn!("Receive task has exited, dropping command {:?}", command);
            return;
        }

        match timeout(self.options.write_timeout, response).await {
            Ok(Ok(Ok(_))) => log::debug!("Sent command {:?}", command),
            Ok(Ok(Err(e))) => log::warn!("Failed to send command {:?}: {}", command, e),
            Ok(Err(_)) => log::warn!("Link closed before command {:?} was written", command),
            Err(_) => log::warn!("Timed out writing command {:?}", command),
        }
    }

    /// Oldest undelivered message, if any. Never blocks.
    pub fn poll_inbound(&self) -> Option<InboundMessage> {
        lock(&self.inbound_rx).try_recv().ok()
    }

    /// Every message currently queued, oldest first
    pub fn drain_inbound(&self) -> Vec<InboundMessage> {
        let mut inbound = lock(&self.inbound_rx);
        let mut messages = Vec::new();
        while let Ok(message) = inbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn status(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Receiver notified on every state change
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Details of the open link, `None` once it has been closed
    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        let link = self.link.lock().await;
        link.as_ref()
            .map(|active| lock(&active.info).clone())
            .filter(|info| info.is_open)
    }

    pub fn metrics(&self) -> LinkMetrics {
        self.metrics_tx.borrow().clone()
    }

    /// Reason for the most recent connect failure or link loss
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn commands(&self) -> CommandChannel<'_> {
        CommandChannel::new(self)
    }

    fn connect_failed(&self, error: SerialError) -> SerialError {
        let error = match error {
            SerialError::ConnectionFailed(_) | SerialError::PortNotFound(_) => error,
            other => SerialError::ConnectionFailed(other.to_string()),
        };
        log::error!("{}", error);
        *lock(&self.last_error) = Some(error.to_string());
        set_state(&self.state_tx, ConnectionState::Disconnected);
        error
    }

    async fn shutdown_link(&self, active: ActiveLink) {
        let ActiveLink { info, request_tx, mut task } = active;
        let port_name = lock(&info).port_name.clone();

        if !task.is_finished() {
            set_state(&self.state_tx, ConnectionState::Disconnecting);
            let (responder, done) = oneshot::channel();
            let request = LinkRequest::Shutdown {
                farewell: Some(DeviceCommand::Disconnect.to_string()),
                responder,
            };
            if request_tx.send(request).await.is_ok() {
                let _ = timeout(self.options.shutdown_timeout, done).await;
            }
        }
        drop(request_tx);

        if timeout(self.options.shutdown_timeout, &mut task).await.is_err() {
            log::warn!("Receive task for {} did not stop in time, aborting it", port_name);
            task.abort();
        }

        lock(&info).is_open = false;
        set_state(&self.state_tx, ConnectionState::Disconnected);
        log::info!("Disconnected from {}", port_name);
    }
}

/// Receive loop plus the single write path of one open link
struct IoTask {
    io: Box<dyn SerialPortIO>,
    framer: LineFramer,
    requests: mpsc::Receiver<LinkRequest>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    metrics_tx: Arc<watch::Sender<LinkMetrics>>,
    last_error: Arc<StdMutex<Option<String>>>,
    info: Arc<StdMutex<ConnectionInfo>>,
    poll_timeout_ms: u64,
    command_grace: Duration,
}

impl IoTask {
    async fn run(mut self) {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            loop {
                match self.requests.try_recv() {
                    Ok(LinkRequest::Write { line, responder }) => {
                        let result = self.write(&line).await;
                        let _ = responder.send(result);
                    }
                    Ok(LinkRequest::Shutdown { farewell, responder }) => {
                        self.shutdown(farewell).await;
                        let _ = responder.send(());
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        // session dropped without disconnecting
                        self.shutdown(None).await;
                        return;
                    }
                }
            }

            match self.io.read_data(&mut buffer, self.poll_timeout_ms).await {
                Ok(0) => sleep(Duration::from_millis(self.poll_timeout_ms)).await,
                Ok(n) => self.handle_bytes(&buffer[..n]),
                Err(SerialError::Timeout) => {}
                Err(e) => {
                    self.fail(e).await;
                    return;
                }
            }
        }
    }

    fn handle_bytes(&mut self, bytes: &[u8]) {
        lock(&self.info).touch();

        let lines = self.framer.feed(bytes);
        let mut delta = LinkMetrics::default();
        for line in lines {
            let parsed = parse_line(&line);
            match &parsed {
                ParsedLine::Sensor(_) => delta.sensor_records += 1,
                ParsedLine::Response(response) => {
                    log::info!("Device response: {}", response.text);
                    delta.device_responses += 1;
                }
                ParsedLine::Unrecognized(_) => delta.unrecognized_lines += 1,
                ParsedLine::Empty => continue,
            }
            delta.lines_read += 1;
            if let Some(message) = parsed.into_inbound() {
                let _ = self.inbound_tx.send(message);
            }
        }

        let oversized = self.framer.oversized_dropped();
        let decode_errors = self.framer.decode_errors();
        self.metrics_tx.send_modify(|m| {
            m.bytes_read += bytes.len() as u64;
            m.lines_read += delta.lines_read;
            m.sensor_records += delta.sensor_records;
            m.device_responses += delta.device_responses;
            m.unrecognized_lines += delta.unrecognized_lines;
            m.oversized_lines_dropped = oversized;
            m.utf8_decode_errors = decode_errors;
        });
    }

    async fn write(&mut self, line: &str) -> crate::serial::Result<usize> {
        let result = write_line(&mut *self.io, line).await;
        self.metrics_tx.send_modify(|m| match &result {
            Ok(_) => m.commands_written += 1,
            Err(_) => m.write_failures += 1,
        });
        result
    }

    async fn shutdown(&mut self, farewell: Option<String>) {
        if let Some(line) = farewell {
            if let Err(e) = self.write(&line).await {
                log::debug!("Ignoring failed {} write: {}", line, e);
            } else if !self.command_grace.is_zero() {
                sleep(self.command_grace).await;
            }
        }
        self.io.close().await;
        lock(&self.info).is_open = false;
    }

    async fn fail(&mut self, error: SerialError) {
        let port_name = lock(&self.info).port_name.clone();
        let message = format!("read from {} failed: {}", port_name, error);
        log::error!("Link lost: {}", message);

        *lock(&self.last_error) = Some(message.clone());
        self.metrics_tx.send_modify(|m| m.last_error = Some(message.clone()));
        set_state(&self.state_tx, ConnectionState::Failed(message));

        self.io.close().await;
        lock(&self.info).is_open = false;
        set_state(&self.state_tx, ConnectionState::Disconnected);
    }
}

async fn write_line(io: &mut dyn SerialPortIO, command: &str) -> crate::serial::Result<usize> {
    let line = format!("{}\n", command);
    io.send_data(line.as_bytes()).await
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    });
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
