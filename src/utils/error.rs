use crate::domain::model::{Command, ErrorCode, ResponseStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PjlinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid IP address: {address}")]
    InvalidIpError { address: String },

    #[error("Connection to {address} failed: {message}")]
    ConnectionError { address: String, message: String },

    #[error("Not connected to projector")]
    NotConnectedError,

    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    #[error("{command} timed out after {seconds:.1}s")]
    TimeoutError { command: String, seconds: f64 },

    #[error("Invalid response: {response}")]
    InvalidResponseError { response: String },

    #[error("Projector rejected {command}: {status}")]
    CommandRejectedError {
        command: Command,
        status: ResponseStatus,
    },

    #[error("{command} is not allowed while projector is {state}")]
    CommandNotAllowedError { command: Command, state: String },

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhaustedError { attempts: u32 },

    #[error("Discovery error: {message}")]
    DiscoveryError { message: String },

    #[error("Preset error: {message}")]
    PresetError { message: String },

    #[error("Group error: {message}")]
    GroupError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Protocol,
    Projector,
    Configuration,
    Storage,
    Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl PjlinkError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PjlinkError::IoError(_)
            | PjlinkError::InvalidIpError { .. }
            | PjlinkError::ConnectionError { .. }
            | PjlinkError::NotConnectedError
            | PjlinkError::TimeoutError { .. }
            | PjlinkError::ReconnectExhaustedError { .. } => ErrorCategory::Network,
            PjlinkError::AuthenticationError { .. } | PjlinkError::InvalidResponseError { .. } => {
                ErrorCategory::Protocol
            }
            PjlinkError::CommandRejectedError { .. } | PjlinkError::CommandNotAllowedError { .. } => {
                ErrorCategory::Projector
            }
            PjlinkError::SerializationError(_) | PjlinkError::PresetError { .. } => {
                ErrorCategory::Storage
            }
            PjlinkError::DiscoveryError { .. } => ErrorCategory::Discovery,
            PjlinkError::GroupError { .. }
            | PjlinkError::ConfigError { .. }
            | PjlinkError::MissingConfigError { .. }
            | PjlinkError::InvalidConfigValueError { .. }
            | PjlinkError::ConfigValidationError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PjlinkError::CommandNotAllowedError { .. } => ErrorSeverity::Low,
            PjlinkError::TimeoutError { .. }
            | PjlinkError::NotConnectedError
            | PjlinkError::ConnectionError { .. }
            | PjlinkError::ReconnectExhaustedError { .. }
            | PjlinkError::DiscoveryError { .. } => ErrorSeverity::Medium,
            PjlinkError::CommandRejectedError { status, .. } => match status {
                ResponseStatus::UnavailableTime => ErrorSeverity::Medium,
                ResponseStatus::ProjectorFailure => ErrorSeverity::Critical,
                _ => ErrorSeverity::High,
            },
            PjlinkError::AuthenticationError { .. }
            | PjlinkError::InvalidResponseError { .. }
            | PjlinkError::InvalidIpError { .. }
            | PjlinkError::PresetError { .. }
            | PjlinkError::GroupError { .. }
            | PjlinkError::ConfigError { .. }
            | PjlinkError::MissingConfigError { .. }
            | PjlinkError::InvalidConfigValueError { .. }
            | PjlinkError::ConfigValidationError { .. }
            | PjlinkError::SerializationError(_) => ErrorSeverity::High,
            PjlinkError::IoError(_) => ErrorSeverity::Critical,
        }
    }

    /// Maps the error onto the code reported in client error events.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            PjlinkError::IoError(_) => ErrorCode::SocketError,
            PjlinkError::InvalidIpError { .. } => ErrorCode::InvalidIp,
            PjlinkError::ConnectionError { .. }
            | PjlinkError::NotConnectedError
            | PjlinkError::ReconnectExhaustedError { .. } => ErrorCode::ConnectionFailed,
            PjlinkError::AuthenticationError { .. } => ErrorCode::AuthenticationFailed,
            PjlinkError::TimeoutError { .. } => ErrorCode::Timeout,
            PjlinkError::InvalidResponseError { .. } => ErrorCode::InvalidResponse,
            PjlinkError::CommandRejectedError { .. } => ErrorCode::ProjectorError,
            PjlinkError::CommandNotAllowedError { .. } => ErrorCode::CommandFailed,
            _ => ErrorCode::UnknownError,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            PjlinkError::InvalidIpError { .. } => {
                "Use a dotted IPv4 address such as 192.168.1.20".to_string()
            }
            PjlinkError::ConnectionError { .. } | PjlinkError::NotConnectedError => {
                "Check that the projector is powered, on the network and has PJLink enabled (TCP 4352)"
                    .to_string()
            }
            PjlinkError::AuthenticationError { .. } => {
                "Verify the PJLink password configured on the projector".to_string()
            }
            PjlinkError::TimeoutError { .. } => {
                "The projector may be busy; retry or raise the command timeout".to_string()
            }
            PjlinkError::ReconnectExhaustedError { .. } => {
                "Increase max reconnect attempts or check the network path".to_string()
            }
            PjlinkError::CommandRejectedError { status, .. } => match status {
                ResponseStatus::UndefinedCommand => {
                    "The projector does not support this command".to_string()
                }
                ResponseStatus::OutOfParameter => {
                    "Check the parameter, e.g. the input source exists on this model".to_string()
                }
                ResponseStatus::UnavailableTime => {
                    "Wait until the projector finishes warming up or cooling down".to_string()
                }
                ResponseStatus::ProjectorFailure => {
                    "Query the error status (ERST) and inspect the projector".to_string()
                }
                _ => "Retry the command".to_string(),
            },
            PjlinkError::CommandNotAllowedError { .. } => {
                "Connect and power on the projector before sending this command".to_string()
            }
            PjlinkError::InvalidResponseError { .. } => {
                "The device answered with a non-PJLink reply; confirm it is a PJLink projector"
                    .to_string()
            }
            PjlinkError::DiscoveryError { .. } => {
                "Check the address range and that UDP broadcast is allowed".to_string()
            }
            PjlinkError::PresetError { .. } | PjlinkError::SerializationError(_) => {
                "Check the preset name and the presets file".to_string()
            }
            PjlinkError::GroupError { .. } => "Check the group name".to_string(),
            PjlinkError::ConfigError { .. }
            | PjlinkError::MissingConfigError { .. }
            | PjlinkError::InvalidConfigValueError { .. }
            | PjlinkError::ConfigValidationError { .. } => {
                "Fix the configuration value and try again".to_string()
            }
            PjlinkError::IoError(_) => "Check file permissions and disk space".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            PjlinkError::NotConnectedError => "Projector is not connected".to_string(),
            PjlinkError::CommandRejectedError { command, status } => {
                format!("Projector refused {} ({})", command, status)
            }
            PjlinkError::TimeoutError { command, .. } => {
                format!("No answer from projector for {}", command)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PjlinkError>;
