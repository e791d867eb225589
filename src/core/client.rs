//! TCP connection to a single PJLink projector.
//!
//! The client is request/response: a command is written and the next CR-terminated
//! line is its reply. Replies update the cached [`ProjectorInfo`] and every exchange,
//! error and connection change is published on a broadcast channel.

use crate::capture_diagnostic;
use crate::config::options::ClientOptions;
use crate::core::diagnostics::DiagnosticData;
use crate::core::protocol::{
    self, auth_digest, build_command, parse_response, Greeting, Response, MAX_LINE_LENGTH,
    QUERY, TERMINATOR,
};
use crate::domain::model::{
    AvMuteState, AvMuteTarget, Command, ErrorCode, ErrorStatus, InputSource, LampStatus,
    PowerStatus, ProjectorInfo, ResponseStatus,
};
use crate::utils::error::{PjlinkError, Result};
use std::fmt;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Commands queried by a full status refresh.
pub const STATUS_COMMANDS: [Command; 6] = [
    Command::Powr,
    Command::Inpt,
    Command::Name,
    Command::Inf1,
    Command::Inf2,
    Command::Clss,
];

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_BACKOFF_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "SEND"),
            Direction::Receive => write!(f, "RECV"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionChanged {
        projector_id: String,
        connected: bool,
    },
    Response {
        projector_id: String,
        command: Command,
        status: ResponseStatus,
        parameter: String,
    },
    CommunicationLog {
        projector_id: String,
        direction: Direction,
        message: String,
    },
    Error {
        projector_id: String,
        code: ErrorCode,
        message: String,
        command: Option<Command>,
    },
    PowerStatusChanged {
        projector_id: String,
        old: PowerStatus,
        new: PowerStatus,
    },
    InputSourceChanged {
        projector_id: String,
        old: InputSource,
        new: InputSource,
    },
    Reconnected {
        projector_id: String,
        attempts: u32,
    },
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending_digest: Option<String>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            pending_digest: None,
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_LINE_LENGTH as u64 + 1)
            .read_until(TERMINATOR, &mut buf)
            .await?;
        if read == 0 {
            return Err(PjlinkError::ConnectionError {
                address: self.peer(),
                message: "connection closed by projector".to_string(),
            });
        }
        if buf.len() > MAX_LINE_LENGTH {
            return Err(PjlinkError::InvalidResponseError {
                response: format!("line of {} bytes", buf.len()),
            });
        }
        Ok(String::from_utf8_lossy(&buf)
            .trim_matches(['\r', '\n'])
            .to_string())
    }

    fn peer(&self) -> String {
        self.writer
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "projector".to_string())
    }
}

/// Holds the connection slot while a command is on the wire. Unless the exchange
/// settles, dropping it discards the stream so a late reply is never read as the
/// answer to the next command.
struct InFlight<'a> {
    client: &'a ProjectorClient,
    slot: tokio::sync::MutexGuard<'a, Option<Connection>>,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled && self.slot.take().is_some() {
            self.client.mark_link_lost();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delay before reconnect attempt `attempt` (1-based), growing 20% per attempt up to 2x.
pub fn backoff_delay(interval: Duration, attempt: u32) -> Duration {
    let factor = (1.0 + 0.2 * attempt as f64).min(MAX_BACKOFF_FACTOR);
    interval.mul_f64(factor)
}

pub struct ProjectorClient {
    options: ClientOptions,
    info: RwLock<ProjectorInfo>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    connected: AtomicBool,
    link_lost: AtomicBool,
    reconnect_attempts: AtomicU32,
    last_error: Mutex<(ErrorCode, String)>,
    connection_diagnostics: Mutex<DiagnosticData>,
    command_diagnostics: Mutex<DiagnosticData>,
    events: broadcast::Sender<ClientEvent>,
}

impl ProjectorClient {
    pub fn new(info: ProjectorInfo, options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let id = info.projector_id();
        Self {
            options,
            info: RwLock::new(info),
            connection: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            link_lost: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            last_error: Mutex::new((ErrorCode::None, String::new())),
            connection_diagnostics: Mutex::new(DiagnosticData::new(format!("Connection_{}", id))),
            command_diagnostics: Mutex::new(DiagnosticData::new("Command_None")),
            events,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn info(&self) -> ProjectorInfo {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the stored identity and credentials; applies on the next connect.
    pub fn set_info(&self, info: ProjectorInfo) {
        let mut current = self.info.write().unwrap_or_else(PoisonError::into_inner);
        let is_connected = current.is_connected;
        *current = ProjectorInfo {
            is_connected,
            ..info
        };
    }

    pub fn projector_id(&self) -> String {
        self.info().projector_id()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> (ErrorCode, String) {
        lock(&self.last_error).clone()
    }

    pub fn last_error_message(&self) -> String {
        lock(&self.last_error).1.clone()
    }

    pub fn connection_diagnostics(&self) -> DiagnosticData {
        lock(&self.connection_diagnostics).clone()
    }

    pub fn command_diagnostics(&self) -> DiagnosticData {
        lock(&self.command_diagnostics).clone()
    }

    pub async fn connect(&self) -> Result<()> {
        let info = self.info();
        let id = info.projector_id();
        {
            let mut diag = lock(&self.connection_diagnostics);
            diag.restart(format!("Connection_{}", id));
            capture_diagnostic!(diag, "Connecting to {} ({})", info.display_name(), id);
        }

        self.close_connection().await;
        self.mark_disconnected();

        let ip: Ipv4Addr = match info.ip_address.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                return Err(self.fail(
                    PjlinkError::InvalidIpError {
                        address: info.ip_address.clone(),
                    },
                    None,
                ))
            }
        };

        let wait = self.options.connect_timeout;
        let stream = match timeout(wait, TcpStream::connect((ip, info.port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(self.fail(
                    PjlinkError::ConnectionError {
                        address: id,
                        message: e.to_string(),
                    },
                    None,
                ))
            }
            Err(_) => {
                return Err(self.fail(
                    PjlinkError::TimeoutError {
                        command: "connect".to_string(),
                        seconds: wait.as_secs_f64(),
                    },
                    None,
                ))
            }
        };
        let _ = stream.set_nodelay(true);
        capture_diagnostic!(lock(&self.connection_diagnostics), "TCP connection established");

        let mut connection = Connection::new(stream);
        let greeting_line = match timeout(wait, connection.read_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => return Err(self.fail(e, None)),
            Err(_) => {
                return Err(self.fail(
                    PjlinkError::TimeoutError {
                        command: "greeting".to_string(),
                        seconds: wait.as_secs_f64(),
                    },
                    None,
                ))
            }
        };
        self.log_communication(Direction::Receive, &greeting_line);

        let greeting = Greeting::parse(&greeting_line).map_err(|e| self.fail(e, None))?;
        match &greeting {
            Greeting::NoAuthentication => {}
            Greeting::Authentication { seed } => {
                if info.password.is_empty() {
                    return Err(self.fail(
                        PjlinkError::AuthenticationError {
                            message: "projector requires a password".to_string(),
                        },
                        None,
                    ));
                }
                connection.pending_digest = Some(auth_digest(seed, &info.password));
            }
            Greeting::Rejected => {
                return Err(self.fail(
                    PjlinkError::AuthenticationError {
                        message: "projector rejected the session".to_string(),
                    },
                    None,
                ))
            }
        }

        let requires_authentication = greeting.requires_authentication();
        self.update_info(|i| i.requires_authentication = requires_authentication);
        *self.connection.lock().await = Some(connection);

        if requires_authentication {
            capture_diagnostic!(lock(&self.connection_diagnostics), "Verifying authentication");
            if let Err(e) = self.exchange(Command::Powr, QUERY, self.options.command_timeout).await {
                self.close_connection().await;
                return Err(e);
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        self.link_lost.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.update_info(|i| i.is_connected = true);
        capture_diagnostic!(lock(&self.connection_diagnostics), "Connected");
        tracing::info!("Connected to projector {} ({})", info.display_name(), id);
        self.emit(ClientEvent::ConnectionChanged {
            projector_id: id,
            connected: true,
        });
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.close_connection().await;
        self.link_lost.store(false, Ordering::SeqCst);
        self.mark_disconnected();
        capture_diagnostic!(lock(&self.connection_diagnostics), "Disconnected by request");
    }

    /// Disconnects and forgets the last known power and input state.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.update_info(|i| {
            i.power_status = PowerStatus::Unknown;
            i.current_input = InputSource::Unknown;
        });
    }

    pub async fn send_command(&self, command: Command, parameter: &str) -> Result<Response> {
        self.send_command_with_timeout(command, parameter, self.options.command_timeout)
            .await
    }

    /// Sends one command and waits for its reply. A link that dropped on its own is
    /// re-established first when auto-reconnect is enabled.
    pub async fn send_command_with_timeout(
        &self,
        command: Command,
        parameter: &str,
        wait: Duration,
    ) -> Result<Response> {
        if !self.is_connected() {
            if self.options.auto_reconnect && self.link_lost.load(Ordering::SeqCst) {
                self.reconnect().await?;
            } else {
                return Err(self.fail(PjlinkError::NotConnectedError, Some(command)));
            }
        }
        self.exchange(command, parameter, wait).await
    }

    /// Like `send_command_with_timeout` but turns a PJLink error reply into `Err`.
    pub async fn execute(&self, command: Command, parameter: &str, wait: Duration) -> Result<String> {
        let response = self.send_command_with_timeout(command, parameter, wait).await?;
        if !response.is_success() {
            return Err(PjlinkError::CommandRejectedError {
                command,
                status: response.status,
            });
        }
        Ok(response.parameter)
    }

    pub async fn query(&self, command: Command) -> Result<String> {
        self.execute(command, QUERY, self.options.command_timeout)
            .await
    }

    pub async fn power_on(&self) -> Result<()> {
        self.execute(Command::Powr, "1", self.options.power_on_timeout)
            .await?;
        self.refresh_power().await;
        Ok(())
    }

    pub async fn power_off(&self) -> Result<()> {
        self.execute(Command::Powr, "0", self.options.command_timeout)
            .await?;
        self.refresh_power().await;
        Ok(())
    }

    pub async fn switch_input(&self, source: InputSource) -> Result<()> {
        self.switch_input_channel(source, '1').await
    }

    pub async fn switch_input_channel(&self, source: InputSource, channel: char) -> Result<()> {
        let parameter = protocol::input_parameter(source, channel).ok_or_else(|| {
            PjlinkError::InvalidConfigValueError {
                field: "input".to_string(),
                value: format!("{}{}", source, channel),
                reason: "input source must be RGB, Video, Digital, Storage or Network".to_string(),
            }
        })?;
        self.execute(Command::Inpt, &parameter, self.options.command_timeout)
            .await?;

        let old = self.info().current_input;
        if old != source {
            self.update_info(|i| i.current_input = source);
            self.emit(ClientEvent::InputSourceChanged {
                projector_id: self.projector_id(),
                old,
                new: source,
            });
        }
        Ok(())
    }

    pub async fn set_av_mute(&self, target: AvMuteTarget, muted: bool) -> Result<()> {
        let parameter = protocol::av_mute_parameter(target, muted);
        self.execute(Command::Avmt, &parameter, self.options.command_timeout)
            .await?;
        Ok(())
    }

    pub async fn av_mute_state(&self) -> Result<AvMuteState> {
        let value = self.query(Command::Avmt).await?;
        protocol::parse_av_mute(&value).ok_or(PjlinkError::InvalidResponseError { response: value })
    }

    pub async fn error_status(&self) -> Result<ErrorStatus> {
        let value = self.query(Command::Erst).await?;
        protocol::parse_error_status(&value)
            .ok_or(PjlinkError::InvalidResponseError { response: value })
    }

    pub async fn lamp_status(&self) -> Result<Vec<LampStatus>> {
        let value = self.query(Command::Lamp).await?;
        protocol::parse_lamp_status(&value)
            .ok_or(PjlinkError::InvalidResponseError { response: value })
    }

    pub async fn available_inputs(&self) -> Result<Vec<(InputSource, char)>> {
        let value = self.query(Command::Inst).await?;
        Ok(protocol::parse_input_list(&value))
    }

    pub async fn request_status(&self) -> Result<()> {
        self.query_all(&STATUS_COMMANDS).await
    }

    /// Queries every command even after a failure; returns the first error.
    pub async fn query_all(&self, commands: &[Command]) -> Result<()> {
        let mut first_error = None;
        for command in commands {
            if let Err(e) = self.query(*command).await {
                tracing::debug!("Status query {} failed: {}", command, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn reconnect(&self) -> Result<()> {
        let id = self.projector_id();
        let max_attempts = self.options.max_reconnect_attempts;

        loop {
            if self.is_connected() {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                return Ok(());
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if max_attempts > 0 && attempt > max_attempts {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.emit_error(
                    ErrorCode::ConnectionFailed,
                    &format!("Failed to reconnect after {} attempts", max_attempts),
                    None,
                );
                return Err(PjlinkError::ReconnectExhaustedError {
                    attempts: max_attempts,
                });
            }

            tracing::info!("Reconnecting to {} (attempt {})", id, attempt);
            match self.connect().await {
                Ok(()) => {
                    self.emit(ClientEvent::Reconnected {
                        projector_id: id,
                        attempts: attempt,
                    });
                    return Ok(());
                }
                Err(e) => {
                    if !self.options.auto_reconnect {
                        self.reconnect_attempts.store(0, Ordering::SeqCst);
                        return Err(e);
                    }
                    if max_attempts == 0 || attempt < max_attempts {
                        let delay = backoff_delay(self.options.reconnect_interval, attempt);
                        tracing::debug!("Next reconnect attempt in {:.1}s", delay.as_secs_f64());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    pub fn generate_diagnostic_report(&self) -> String {
        let info = self.info();
        let (code, message) = self.last_error();
        let mut report = String::new();

        let _ = writeln!(report, "===== PJLink Diagnostic Report =====");
        let _ = writeln!(report, "Projector: {} ({})", info.display_name(), info.projector_id());
        let _ = writeln!(
            report,
            "Generated: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(report);

        let _ = writeln!(report, "--- Connection Diagnostics ---");
        let _ = writeln!(report, "{}", self.connection_diagnostics().report());

        let _ = writeln!(report, "--- Last Command Diagnostics ---");
        let _ = writeln!(report, "{}", self.command_diagnostics().report());

        let _ = writeln!(report, "--- Current Status ---");
        let _ = writeln!(report, "Connected: {}", if self.is_connected() { "Yes" } else { "No" });
        let _ = writeln!(report, "Power Status: {}", info.power_status);
        let _ = writeln!(report, "Input Source: {}", info.current_input);
        let _ = writeln!(report, "Device Class: {}", info.device_class);
        let _ = writeln!(report, "Manufacturer: {}", info.manufacturer_name);
        let _ = writeln!(report, "Product: {}", info.product_name);
        let _ = writeln!(report, "Reconnect Attempts: {}", self.reconnect_attempts());
        let _ = writeln!(report);

        let _ = writeln!(report, "--- Last Error ---");
        let _ = writeln!(report, "Code: {}", code);
        let _ = writeln!(
            report,
            "Message: {}",
            if message.is_empty() { "None" } else { &message }
        );
        report
    }

    async fn exchange(&self, command: Command, parameter: &str, wait: Duration) -> Result<Response> {
        let info = self.info();
        let line = build_command(info.device_class, command, parameter);
        {
            let mut diag = lock(&self.command_diagnostics);
            diag.restart(format!("Command_{}", command));
            capture_diagnostic!(diag, "Sending command: {}", line.trim_end());
        }

        let started = Instant::now();
        let mut in_flight = InFlight {
            client: self,
            slot: self.connection.lock().await,
            settled: false,
        };
        let Some(connection) = in_flight.slot.as_mut() else {
            return Err(self.fail(PjlinkError::NotConnectedError, Some(command)));
        };

        let payload = match connection.pending_digest.take() {
            Some(digest) => format!("{}{}", digest, line),
            None => line.clone(),
        };
        self.log_communication(Direction::Send, line.trim_end());

        let outcome = timeout(wait, async {
            connection.writer.write_all(payload.as_bytes()).await?;
            connection.read_line().await
        })
        .await;

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                drop(in_flight);
                return Err(self.fail(e, Some(command)));
            }
            Err(_) => {
                // Unanswered: the reply may still arrive, so the stream goes with the guard.
                drop(in_flight);
                return Err(self.fail(
                    PjlinkError::TimeoutError {
                        command: command.code().to_string(),
                        seconds: wait.as_secs_f64(),
                    },
                    Some(command),
                ));
            }
        };
        self.log_communication(Direction::Receive, &raw);

        let parsed = parse_response(&raw);
        // A reply for another command means the stream is out of step.
        in_flight.settled = !matches!(&parsed, Ok(response) if response.command != command);
        drop(in_flight);

        let response = match parsed {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, PjlinkError::AuthenticationError { .. }) {
                    self.close_connection().await;
                    self.mark_disconnected();
                }
                return Err(self.fail(e, Some(command)));
            }
        };

        if response.command != command {
            return Err(self.fail(
                PjlinkError::InvalidResponseError { response: raw },
                Some(command),
            ));
        }

        capture_diagnostic!(
            lock(&self.command_diagnostics),
            "Response received for {} in {:.3}s: {}",
            command,
            started.elapsed().as_secs_f64(),
            response.status
        );

        if response.status == ResponseStatus::AuthenticationError {
            self.close_connection().await;
            self.mark_disconnected();
            return Err(self.fail(
                PjlinkError::AuthenticationError {
                    message: "projector rejected the authentication digest".to_string(),
                },
                Some(command),
            ));
        }

        if response.is_success() {
            self.apply_response(&response);
        } else {
            self.emit_error(
                ErrorCode::ProjectorError,
                &format!("{} failed: {}", command, response.status),
                Some(command),
            );
        }

        self.emit(ClientEvent::Response {
            projector_id: info.projector_id(),
            command,
            status: response.status,
            parameter: response.parameter.clone(),
        });
        Ok(response)
    }

    fn apply_response(&self, response: &Response) {
        let value = response.parameter.as_str();
        if value.is_empty() {
            return;
        }
        let id = self.projector_id();

        match response.command {
            Command::Powr => {
                let new = PowerStatus::from_wire(value);
                let old = self.info().power_status;
                if old != new {
                    self.update_info(|i| i.power_status = new);
                    self.emit(ClientEvent::PowerStatusChanged {
                        projector_id: id,
                        old,
                        new,
                    });
                }
            }
            Command::Inpt => {
                if let Some((new, _)) = protocol::parse_input(value) {
                    let old = self.info().current_input;
                    if old != new {
                        self.update_info(|i| i.current_input = new);
                        self.emit(ClientEvent::InputSourceChanged {
                            projector_id: id,
                            old,
                            new,
                        });
                    }
                }
            }
            Command::Name => self.update_info(|i| i.name = value.to_string()),
            Command::Inf1 => self.update_info(|i| i.manufacturer_name = value.to_string()),
            Command::Inf2 => self.update_info(|i| i.product_name = value.to_string()),
            Command::Info => self.update_info(|i| i.version_info = value.to_string()),
            Command::Clss => {
                if let Some(class) = protocol::parse_class(value) {
                    self.update_info(|i| i.device_class = class);
                }
            }
            _ => {}
        }
    }

    async fn refresh_power(&self) {
        if let Err(e) = self.query(Command::Powr).await {
            tracing::warn!("Power status refresh failed: {}", e);
        }
    }

    async fn close_connection(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            let _ = connection.writer.shutdown().await;
        }
    }

    fn mark_link_lost(&self) {
        if self.is_connected() {
            self.link_lost.store(true, Ordering::SeqCst);
        }
        self.mark_disconnected();
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.update_info(|i| i.is_connected = false);
            tracing::info!("Disconnected from projector {}", self.projector_id());
            self.emit(ClientEvent::ConnectionChanged {
                projector_id: self.projector_id(),
                connected: false,
            });
        }
    }

    fn update_info(&self, apply: impl FnOnce(&mut ProjectorInfo)) {
        let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut info);
    }

    fn log_communication(&self, direction: Direction, message: &str) {
        let id = self.projector_id();
        if self.options.log_communication {
            tracing::info!("[{}] {} {}", direction, id, message);
        } else {
            tracing::trace!("[{}] {} {}", direction, id, message);
        }
        self.emit(ClientEvent::CommunicationLog {
            projector_id: id,
            direction,
            message: message.to_string(),
        });
    }

    fn fail(&self, error: PjlinkError, command: Option<Command>) -> PjlinkError {
        self.emit_error(error.error_code(), &error.to_string(), command);
        error
    }

    fn emit_error(&self, code: ErrorCode, message: &str, command: Option<Command>) {
        tracing::error!("[{}] {}: {}", self.projector_id(), code, message);
        *lock(&self.last_error) = (code, message.to_string());
        let diagnostics = if command.is_some() {
            &self.command_diagnostics
        } else {
            &self.connection_diagnostics
        };
        capture_diagnostic!(lock(diagnostics), "Error {}: {}", code, message);

        self.emit(ClientEvent::Error {
            projector_id: self.projector_id(),
            code,
            message: message.to_string(),
            command,
        });
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_is_capped() {
        let interval = Duration::from_secs(3);
        assert_eq!(backoff_delay(interval, 1), Duration::from_millis(3600));
        assert_eq!(backoff_delay(interval, 5), Duration::from_secs(6));
        assert_eq!(backoff_delay(interval, 50), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_command_without_connection_fails() {
        let options = ClientOptions {
            auto_reconnect: false,
            ..Default::default()
        };
        let client = ProjectorClient::new(ProjectorInfo::new("P", "127.0.0.1", 4352), options);
        let mut events = client.subscribe();

        let result = client.send_command(Command::Powr, "?").await;
        assert!(matches!(result, Err(PjlinkError::NotConnectedError)));

        let (code, _) = client.last_error();
        assert_eq!(code, ErrorCode::ConnectionFailed);
        assert!(matches!(
            events.recv().await.unwrap(),
            ClientEvent::Error { command: Some(Command::Powr), .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_ip_is_rejected() {
        let client = ProjectorClient::new(
            ProjectorInfo::new("P", "not-an-ip", 4352),
            ClientOptions::default(),
        );
        let result = client.connect().await;
        assert!(matches!(result, Err(PjlinkError::InvalidIpError { .. })));
        assert_eq!(client.last_error().0, ErrorCode::InvalidIp);
        assert!(client
            .generate_diagnostic_report()
            .contains("--- Last Error ---"));
    }

    #[test]
    fn test_set_info_keeps_connection_flag() {
        let client = ProjectorClient::new(
            ProjectorInfo::new("Old", "10.0.0.1", 4352),
            ClientOptions::default(),
        );
        client.set_info(ProjectorInfo::new("New", "10.0.0.2", 4352).with_password("pw"));
        let info = client.info();
        assert_eq!(info.name, "New");
        assert!(info.requires_authentication);
        assert!(!info.is_connected);
    }
}
