use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_PJLINK_PORT: u16 = 4352;
pub const MAX_STATUS_HISTORY: usize = 10;
pub const COMMAND_FAILURE_THRESHOLD: u32 = 3;

/// PJLink command class. Persisted as its index (0 = class 1, 1 = class 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DeviceClass {
    #[default]
    Class1,
    Class2,
}

impl DeviceClass {
    pub fn wire_digit(&self) -> char {
        match self {
            DeviceClass::Class1 => '1',
            DeviceClass::Class2 => '2',
        }
    }

    pub fn from_wire_digit(c: char) -> Option<Self> {
        match c {
            '1' => Some(DeviceClass::Class1),
            '2' => Some(DeviceClass::Class2),
            _ => None,
        }
    }
}

impl From<DeviceClass> for u8 {
    fn from(class: DeviceClass) -> u8 {
        match class {
            DeviceClass::Class1 => 0,
            DeviceClass::Class2 => 1,
        }
    }
}

impl TryFrom<u8> for DeviceClass {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceClass::Class1),
            1 => Ok(DeviceClass::Class2),
            other => Err(format!("invalid device class index: {}", other)),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Class1 => write!(f, "Class 1"),
            DeviceClass::Class2 => write!(f, "Class 2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PowerStatus {
    PoweredOff,
    PoweredOn,
    CoolingDown,
    WarmingUp,
    #[default]
    Unknown,
}

impl PowerStatus {
    pub fn from_wire(value: &str) -> Self {
        match value.trim() {
            "0" => PowerStatus::PoweredOff,
            "1" => PowerStatus::PoweredOn,
            "2" => PowerStatus::CoolingDown,
            "3" => PowerStatus::WarmingUp,
            _ => PowerStatus::Unknown,
        }
    }
}

impl From<PowerStatus> for u8 {
    fn from(status: PowerStatus) -> u8 {
        match status {
            PowerStatus::PoweredOff => 0,
            PowerStatus::PoweredOn => 1,
            PowerStatus::CoolingDown => 2,
            PowerStatus::WarmingUp => 3,
            PowerStatus::Unknown => 4,
        }
    }
}

impl TryFrom<u8> for PowerStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PowerStatus::PoweredOff),
            1 => Ok(PowerStatus::PoweredOn),
            2 => Ok(PowerStatus::CoolingDown),
            3 => Ok(PowerStatus::WarmingUp),
            4 => Ok(PowerStatus::Unknown),
            other => Err(format!("invalid power status index: {}", other)),
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PowerStatus::PoweredOff => "Powered Off",
            PowerStatus::PoweredOn => "Powered On",
            PowerStatus::CoolingDown => "Cooling Down",
            PowerStatus::WarmingUp => "Warming Up",
            PowerStatus::Unknown => "Unknown",
        };
        write!(f, "{}", text)
    }
}

/// Input terminal type. On the wire it is the first digit of the INPT parameter;
/// persisted files store the index (RGB = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum InputSource {
    Rgb,
    Video,
    Digital,
    Storage,
    Network,
    #[default]
    Unknown,
}

impl InputSource {
    pub fn wire_digit(&self) -> Option<char> {
        match self {
            InputSource::Rgb => Some('1'),
            InputSource::Video => Some('2'),
            InputSource::Digital => Some('3'),
            InputSource::Storage => Some('4'),
            InputSource::Network => Some('5'),
            InputSource::Unknown => None,
        }
    }

    pub fn from_wire_digit(c: char) -> Self {
        match c {
            '1' => InputSource::Rgb,
            '2' => InputSource::Video,
            '3' => InputSource::Digital,
            '4' => InputSource::Storage,
            '5' => InputSource::Network,
            _ => InputSource::Unknown,
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rgb" | "1" => Some(InputSource::Rgb),
            "video" | "2" => Some(InputSource::Video),
            "digital" | "hdmi" | "3" => Some(InputSource::Digital),
            "storage" | "usb" | "4" => Some(InputSource::Storage),
            "network" | "5" => Some(InputSource::Network),
            _ => None,
        }
    }
}

impl From<InputSource> for u8 {
    fn from(source: InputSource) -> u8 {
        match source {
            InputSource::Rgb => 0,
            InputSource::Video => 1,
            InputSource::Digital => 2,
            InputSource::Storage => 3,
            InputSource::Network => 4,
            InputSource::Unknown => 5,
        }
    }
}

impl TryFrom<u8> for InputSource {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InputSource::Rgb),
            1 => Ok(InputSource::Video),
            2 => Ok(InputSource::Digital),
            3 => Ok(InputSource::Storage),
            4 => Ok(InputSource::Network),
            5 => Ok(InputSource::Unknown),
            other => Err(format!("invalid input source index: {}", other)),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InputSource::Rgb => "RGB",
            InputSource::Video => "Video",
            InputSource::Digital => "Digital",
            InputSource::Storage => "Storage",
            InputSource::Network => "Network",
            InputSource::Unknown => "Unknown",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Powr,
    Inpt,
    Avmt,
    Erst,
    Lamp,
    Inst,
    Name,
    Inf1,
    Inf2,
    Info,
    Clss,
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::Powr,
        Command::Inpt,
        Command::Avmt,
        Command::Erst,
        Command::Lamp,
        Command::Inst,
        Command::Name,
        Command::Inf1,
        Command::Inf2,
        Command::Info,
        Command::Clss,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Command::Powr => "POWR",
            Command::Inpt => "INPT",
            Command::Avmt => "AVMT",
            Command::Erst => "ERST",
            Command::Lamp => "LAMP",
            Command::Inst => "INST",
            Command::Name => "NAME",
            Command::Inf1 => "INF1",
            Command::Inf2 => "INF2",
            Command::Info => "INFO",
            Command::Clss => "CLSS",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let upper = code.trim().to_ascii_uppercase();
        Command::ALL.iter().copied().find(|c| c.code() == upper)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    UndefinedCommand,
    OutOfParameter,
    UnavailableTime,
    ProjectorFailure,
    AuthenticationError,
    NoResponse,
    Unknown,
}

impl ResponseStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseStatus::Success)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResponseStatus::Success => "Success",
            ResponseStatus::UndefinedCommand => "Undefined Command",
            ResponseStatus::OutOfParameter => "Out of Parameter",
            ResponseStatus::UnavailableTime => "Unavailable Time",
            ResponseStatus::ProjectorFailure => "Projector Failure",
            ResponseStatus::AuthenticationError => "Authentication Error",
            ResponseStatus::NoResponse => "No Response",
            ResponseStatus::Unknown => "Unknown",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    None,
    ConnectionFailed,
    AuthenticationFailed,
    InvalidIp,
    SocketCreationFailed,
    SocketError,
    CommandFailed,
    Timeout,
    InvalidResponse,
    ProjectorError,
    UnknownError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,
    #[serde(rename = "DeviceClass", default)]
    pub device_class: DeviceClass,
    #[serde(rename = "RequiresAuthentication", default)]
    pub requires_authentication: bool,
    #[serde(rename = "Password", default)]
    pub password: String,

    #[serde(skip)]
    pub power_status: PowerStatus,
    #[serde(skip)]
    pub current_input: InputSource,
    #[serde(skip)]
    pub version_info: String,
    #[serde(skip)]
    pub manufacturer_name: String,
    #[serde(skip)]
    pub product_name: String,
    #[serde(skip)]
    pub is_connected: bool,
}

fn default_port() -> u16 {
    DEFAULT_PJLINK_PORT
}

impl Default for ProjectorInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            ip_address: String::new(),
            port: DEFAULT_PJLINK_PORT,
            device_class: DeviceClass::Class1,
            requires_authentication: false,
            password: String::new(),
            power_status: PowerStatus::Unknown,
            current_input: InputSource::Unknown,
            version_info: String::new(),
            manufacturer_name: String::new(),
            product_name: String::new(),
            is_connected: false,
        }
    }
}

impl ProjectorInfo {
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self.requires_authentication = !self.password.is_empty();
        self
    }

    pub fn with_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }

    /// Projectors are identified by "ip:port" across the manager and presets.
    pub fn projector_id(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.ip_address
        } else {
            &self.name
        }
    }
}

/// Per-component state reported by ERST. Each field is 0 (ok), 1 (warning) or 2 (error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorStatus {
    pub fan: u8,
    pub lamp: u8,
    pub temperature: u8,
    pub cover_open: u8,
    pub filter: u8,
    pub other: u8,
}

impl ErrorStatus {
    pub fn has_error(&self) -> bool {
        self.fields().iter().any(|(_, v)| *v == 2)
    }

    pub fn has_warning(&self) -> bool {
        self.fields().iter().any(|(_, v)| *v == 1)
    }

    pub fn fields(&self) -> [(&'static str, u8); 6] {
        [
            ("fan", self.fan),
            ("lamp", self.lamp),
            ("temperature", self.temperature),
            ("cover_open", self.cover_open),
            ("filter", self.filter),
            ("other", self.other),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampStatus {
    pub hours: u32,
    pub is_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvMuteTarget {
    Video,
    Audio,
    AudioVideo,
}

impl AvMuteTarget {
    pub fn wire_digit(&self) -> char {
        match self {
            AvMuteTarget::Video => '1',
            AvMuteTarget::Audio => '2',
            AvMuteTarget::AudioVideo => '3',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvMuteState {
    pub target: AvMuteTarget,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorStatusRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub power_status: PowerStatus,
    pub input_source: InputSource,
    pub is_connected: bool,
    pub error_message: String,
}

impl Default for ProjectorStatusRecord {
    fn default() -> Self {
        Self {
            timestamp: None,
            power_status: PowerStatus::Unknown,
            input_source: InputSource::Unknown,
            is_connected: false,
            error_message: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorStatus {
    pub projector_id: String,
    pub projector_name: String,
    pub ip_address: String,
    pub port: u16,
    pub current: ProjectorStatusRecord,
    pub history: Vec<ProjectorStatusRecord>,
    pub last_response_time: Option<DateTime<Utc>>,
    pub last_command_time: Option<DateTime<Utc>>,
    pub response_time_ms: f64,
    pub connection_failure_count: u32,
    pub command_failure_count: u32,
    pub is_healthy: bool,
}

impl ProjectorStatus {
    pub fn new(info: &ProjectorInfo) -> Self {
        Self {
            projector_id: info.projector_id(),
            projector_name: info.name.clone(),
            ip_address: info.ip_address.clone(),
            port: info.port,
            current: ProjectorStatusRecord::default(),
            history: Vec::new(),
            last_response_time: None,
            last_command_time: None,
            response_time_ms: 0.0,
            connection_failure_count: 0,
            command_failure_count: 0,
            is_healthy: true,
        }
    }

    pub fn update_status(
        &mut self,
        power_status: PowerStatus,
        input_source: InputSource,
        is_connected: bool,
        error_message: &str,
    ) {
        let now = Utc::now();

        if self.current.timestamp.is_some() {
            let previous = std::mem::take(&mut self.current);
            self.history.insert(0, previous);
            self.history.truncate(MAX_STATUS_HISTORY);
        }

        self.current = ProjectorStatusRecord {
            timestamp: Some(now),
            power_status,
            input_source,
            is_connected,
            error_message: error_message.to_string(),
        };

        self.last_response_time = Some(now);
        if let Some(sent) = self.last_command_time {
            self.response_time_ms = (now - sent).num_microseconds().unwrap_or(0) as f64 / 1000.0;
        }

        self.is_healthy = is_connected && error_message.is_empty();
    }

    pub fn record_command_sent(&mut self) {
        self.last_command_time = Some(Utc::now());
    }

    pub fn record_connection_failure(&mut self) {
        self.connection_failure_count += 1;
        self.is_healthy = false;
        self.current.is_connected = false;
        self.current.error_message = "Connection failed".to_string();
    }

    pub fn record_command_failure(&mut self, error_message: &str) {
        self.command_failure_count += 1;
        if self.command_failure_count > COMMAND_FAILURE_THRESHOLD {
            self.is_healthy = false;
        }
        self.current.error_message = error_message.to_string();
    }

    /// Returns -1.0 when no response has been recorded yet.
    pub fn seconds_since_last_response(&self) -> f64 {
        seconds_since(self.last_response_time)
    }

    /// Returns -1.0 when no command has been sent yet.
    pub fn seconds_since_last_command(&self) -> f64 {
        seconds_since(self.last_command_time)
    }

    pub fn reset_counters(&mut self) {
        self.connection_failure_count = 0;
        self.command_failure_count = 0;
        self.is_healthy = true;
    }
}

fn seconds_since(time: Option<DateTime<Utc>>) -> f64 {
    match time {
        Some(t) => (Utc::now() - t).num_milliseconds() as f64 / 1000.0,
        None => -1.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorGroup {
    pub name: String,
    pub description: String,
    pub color: [f32; 4],
    pub projector_ids: Vec<String>,
}

impl Default for ProjectorGroup {
    fn default() -> Self {
        Self::new("New Group")
    }
}

impl ProjectorGroup {
    pub const DEFAULT_COLOR: [f32; 4] = [0.0, 0.4, 0.7, 1.0];

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            color: Self::DEFAULT_COLOR,
            projector_ids: Vec::new(),
        }
    }

    pub fn with_info(name: impl Into<String>, description: impl Into<String>, color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            color,
            projector_ids: Vec::new(),
        }
    }

    /// Returns false when the id was already a member.
    pub fn add_projector_id(&mut self, id: &str) -> bool {
        if self.contains_projector_id(id) {
            return false;
        }
        self.projector_ids.push(id.to_string());
        true
    }

    pub fn remove_projector_id(&mut self, id: &str) -> bool {
        let before = self.projector_ids.len();
        self.projector_ids.retain(|p| p != id);
        self.projector_ids.len() != before
    }

    pub fn contains_projector_id(&self, id: &str) -> bool {
        self.projector_ids.iter().any(|p| p == id)
    }

    pub fn projector_count(&self) -> usize {
        self.projector_ids.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub ip_address: String,
    pub port: u16,
    pub name: String,
    pub model_name: String,
    pub device_class: DeviceClass,
    pub requires_authentication: bool,
    pub response_time_ms: f64,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveryResult {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            name: String::new(),
            model_name: String::new(),
            device_class: DeviceClass::Class1,
            requires_authentication: false,
            response_time_ms: 0.0,
            discovered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStatus {
    pub discovery_id: String,
    pub is_complete: bool,
    pub was_cancelled: bool,
    pub scanned_addresses: u32,
    pub total_addresses: u32,
    pub discovered_devices: u32,
    pub elapsed_seconds: f64,
    pub percentage: f32,
}

impl DiscoveryStatus {
    pub fn new(discovery_id: impl Into<String>, total_addresses: u32) -> Self {
        Self {
            discovery_id: discovery_id.into(),
            is_complete: false,
            was_cancelled: false,
            scanned_addresses: 0,
            total_addresses,
            discovered_devices: 0,
            elapsed_seconds: 0.0,
            percentage: 0.0,
        }
    }

    pub fn update_percentage(&mut self) {
        self.percentage = if self.total_addresses > 0 {
            (self.scanned_addresses as f32 / self.total_addresses as f32 * 100.0).min(100.0)
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorCommandOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCommandResult {
    pub command_id: String,
    pub group_name: String,
    pub command: Command,
    pub parameter: String,
    pub total_projectors: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub no_response_count: usize,
    pub results: BTreeMap<String, ProjectorCommandOutcome>,
    pub pending: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GroupCommandResult {
    pub fn new(
        group_name: impl Into<String>,
        command: Command,
        parameter: impl Into<String>,
        projector_ids: Vec<String>,
    ) -> Self {
        Self {
            command_id: uuid::Uuid::new_v4().to_string(),
            group_name: group_name.into(),
            command,
            parameter: parameter.into(),
            total_projectors: projector_ids.len(),
            success_count: 0,
            failure_count: 0,
            no_response_count: 0,
            results: BTreeMap::new(),
            pending: projector_ids,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn add_success(&mut self, projector_id: &str, message: &str) {
        if self.take_pending(projector_id) {
            self.success_count += 1;
            self.record(projector_id, true, message);
        }
    }

    pub fn add_failure(&mut self, projector_id: &str, message: &str) {
        if self.take_pending(projector_id) {
            self.failure_count += 1;
            self.record(projector_id, false, message);
        }
    }

    /// Marks every projector that has not answered as non-responsive.
    pub fn handle_timeout(&mut self) {
        for projector_id in std::mem::take(&mut self.pending) {
            self.no_response_count += 1;
            self.results.insert(
                projector_id,
                ProjectorCommandOutcome {
                    success: false,
                    message: "No response".to_string(),
                },
            );
        }
        self.mark_completed_if_done();
    }

    pub fn has_all_responded(&self) -> bool {
        self.success_count + self.failure_count + self.no_response_count >= self.total_projectors
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    fn take_pending(&mut self, projector_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p != projector_id);
        before != self.pending.len()
    }

    fn record(&mut self, projector_id: &str, success: bool, message: &str) {
        self.results.insert(
            projector_id.to_string(),
            ProjectorCommandOutcome {
                success,
                message: message.to_string(),
            },
        );
        self.mark_completed_if_done();
    }

    fn mark_completed_if_done(&mut self) {
        if self.completed_at.is_none() && self.has_all_responded() {
            self.completed_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projector_info_json_layout() {
        let info = ProjectorInfo::new("Hall A", "192.168.0.20", 4352)
            .with_password("secret")
            .with_class(DeviceClass::Class2);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["Name"], "Hall A");
        assert_eq!(json["IPAddress"], "192.168.0.20");
        assert_eq!(json["Port"], 4352);
        assert_eq!(json["DeviceClass"], 1);
        assert_eq!(json["RequiresAuthentication"], true);
        assert!(json.get("power_status").is_none());

        let parsed: ProjectorInfo = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.projector_id(), "192.168.0.20:4352");
    }

    #[test]
    fn test_input_source_wire_and_names() {
        assert_eq!(InputSource::from_wire_digit('3'), InputSource::Digital);
        assert_eq!(InputSource::Network.wire_digit(), Some('5'));
        assert_eq!(InputSource::Unknown.wire_digit(), None);
        assert_eq!(InputSource::parse_name("HDMI"), Some(InputSource::Digital));
        assert_eq!(InputSource::parse_name("svideo"), None);
        assert_eq!(u8::from(InputSource::Rgb), 0);
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::from_code("inf2"), Some(Command::Inf2));
        assert_eq!(Command::from_code("XXXX"), None);
        assert_eq!(Command::Clss.to_string(), "CLSS");
    }

    #[test]
    fn test_status_history_is_bounded_and_newest_first() {
        let info = ProjectorInfo::new("P", "10.0.0.1", 4352);
        let mut status = ProjectorStatus::new(&info);

        for _ in 0..15 {
            status.update_status(PowerStatus::PoweredOn, InputSource::Rgb, true, "");
        }
        status.update_status(PowerStatus::PoweredOff, InputSource::Video, true, "");

        assert_eq!(status.history.len(), MAX_STATUS_HISTORY);
        assert_eq!(status.history[0].power_status, PowerStatus::PoweredOn);
        assert_eq!(status.current.input_source, InputSource::Video);
        assert!(status.is_healthy);
    }

    #[test]
    fn test_status_health_rules() {
        let info = ProjectorInfo::new("P", "10.0.0.1", 4352);
        let mut status = ProjectorStatus::new(&info);
        assert_eq!(status.seconds_since_last_response(), -1.0);
        assert_eq!(status.seconds_since_last_command(), -1.0);

        status.update_status(PowerStatus::PoweredOn, InputSource::Rgb, true, "lamp warning");
        assert!(!status.is_healthy);

        status.update_status(PowerStatus::PoweredOn, InputSource::Rgb, true, "");
        for _ in 0..3 {
            status.record_command_failure("ERR3");
        }
        assert!(status.is_healthy);
        status.record_command_failure("ERR3");
        assert!(!status.is_healthy);

        status.record_connection_failure();
        assert_eq!(status.connection_failure_count, 1);
        assert_eq!(status.current.error_message, "Connection failed");

        status.reset_counters();
        assert_eq!(status.command_failure_count, 0);
        assert_eq!(status.connection_failure_count, 0);
        assert!(status.is_healthy);
    }

    #[test]
    fn test_group_membership() {
        let mut group = ProjectorGroup::default();
        assert_eq!(group.name, "New Group");
        assert!(group.add_projector_id("10.0.0.1:4352"));
        assert!(!group.add_projector_id("10.0.0.1:4352"));
        assert_eq!(group.projector_count(), 1);
        assert!(group.remove_projector_id("10.0.0.1:4352"));
        assert!(!group.contains_projector_id("10.0.0.1:4352"));
    }

    #[test]
    fn test_group_command_result_accounting() {
        let ids = vec!["a:1".to_string(), "b:1".to_string(), "c:1".to_string()];
        let mut result = GroupCommandResult::new("stage", Command::Powr, "1", ids);

        result.add_success("a:1", "OK");
        result.add_success("a:1", "OK");
        result.add_failure("b:1", "ERR3");
        assert!(!result.has_all_responded());

        result.handle_timeout();
        assert!(result.has_all_responded());
        assert!(result.is_completed());
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.no_response_count, 1);
        assert!(!result.results["c:1"].success);
    }

    #[test]
    fn test_discovery_percentage() {
        let mut status = DiscoveryStatus::new("id", 8);
        status.scanned_addresses = 2;
        status.update_percentage();
        assert_eq!(status.percentage, 25.0);

        let mut empty = DiscoveryStatus::new("id", 0);
        empty.update_percentage();
        assert_eq!(empty.percentage, 0.0);
    }
}
