use crate::domain::ports::ConfigProvider;
use crate::utils::error::Result;
use crate::utils::validation::{validate_positive_number, Validate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 5.0;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 5.0;
pub const DEFAULT_POWER_ON_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: f64 = 3.0;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// 單一連線的設定值，所有 ConfigProvider 最終都會轉成這個結構
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub power_on_timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    /// 0 means unlimited.
    pub max_reconnect_attempts: u32,
    pub log_communication: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs_f64(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs_f64(DEFAULT_COMMAND_TIMEOUT_SECS),
            power_on_timeout: Duration::from_secs_f64(DEFAULT_POWER_ON_TIMEOUT_SECS),
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs_f64(DEFAULT_RECONNECT_INTERVAL_SECS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            log_communication: false,
        }
    }
}

/// Negative or non-finite values become zero and fail validation later.
pub fn duration_from_secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl ClientOptions {
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        Self {
            connect_timeout: provider.connect_timeout(),
            command_timeout: provider.command_timeout(),
            power_on_timeout: provider.power_on_timeout(),
            auto_reconnect: provider.auto_reconnect(),
            reconnect_interval: provider.reconnect_interval(),
            max_reconnect_attempts: provider.max_reconnect_attempts(),
            log_communication: provider.log_communication(),
        }
    }
}

impl ConfigProvider for ClientOptions {
    fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    fn power_on_timeout(&self) -> Duration {
        self.power_on_timeout
    }

    fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    fn log_communication(&self) -> bool {
        self.log_communication
    }
}

impl Validate for ClientOptions {
    fn validate(&self) -> Result<()> {
        validate_positive_number(
            "connect_timeout_ms",
            self.connect_timeout.as_millis() as usize,
            1,
        )?;
        validate_positive_number(
            "command_timeout_ms",
            self.command_timeout.as_millis() as usize,
            1,
        )?;
        validate_positive_number(
            "power_on_timeout_ms",
            self.power_on_timeout.as_millis() as usize,
            1,
        )?;
        Ok(())
    }
}
