use crate::config::options::{duration_from_secs as seconds, ClientOptions};
use crate::core::discovery::{DiscoverySettings, DEFAULT_RANGE_TIMEOUT};
use crate::core::ConfigProvider;
use crate::domain::model::{DeviceClass, ProjectorGroup, ProjectorInfo, DEFAULT_PJLINK_PORT};
use crate::utils::error::{PjlinkError, Result};
use crate::utils::validation::{
    validate_ip_address, validate_non_empty_string, validate_path, validate_port, validate_range,
    Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub presets: PresetsSection,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    #[serde(default)]
    pub projectors: Vec<ProjectorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub connect_timeout_seconds: f64,
    pub command_timeout_seconds: f64,
    pub power_on_timeout_seconds: f64,
    pub auto_reconnect: bool,
    pub reconnect_interval_seconds: f64,
    pub max_reconnect_attempts: u32,
    pub log_communication: bool,
    pub group_command_timeout_seconds: Option<f64>,
    pub status_interval_seconds: Option<f64>,
}

impl Default for ClientSection {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            connect_timeout_seconds: options.connect_timeout.as_secs_f64(),
            command_timeout_seconds: options.command_timeout.as_secs_f64(),
            power_on_timeout_seconds: options.power_on_timeout.as_secs_f64(),
            auto_reconnect: options.auto_reconnect,
            reconnect_interval_seconds: options.reconnect_interval.as_secs_f64(),
            max_reconnect_attempts: options.max_reconnect_attempts,
            log_communication: options.log_communication,
            group_command_timeout_seconds: None,
            status_interval_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub port: u16,
    pub max_concurrent: usize,
    pub per_address_wait_ms: u64,
    pub probe_timeout_seconds: f64,
    pub broadcast_address: String,
    pub timeout_seconds: f64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        let settings = DiscoverySettings::default();
        Self {
            port: settings.port,
            max_concurrent: settings.max_concurrent,
            per_address_wait_ms: settings.per_address_wait.as_millis() as u64,
            probe_timeout_seconds: settings.probe_timeout.as_secs_f64(),
            broadcast_address: settings.broadcast_address.to_string(),
            timeout_seconds: DEFAULT_RANGE_TIMEOUT.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetsSection {
    pub path: String,
}

impl Default for PresetsSection {
    fn default() -> Self {
        Self {
            path: "./presets".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub color: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorEntry {
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_class")]
    pub class: u8,
    pub password: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PJLINK_PORT
}

fn default_class() -> u8 {
    1
}

impl ProjectorEntry {
    pub fn to_info(&self) -> ProjectorInfo {
        let class = if self.class == 2 {
            DeviceClass::Class2
        } else {
            DeviceClass::Class1
        };
        let info = ProjectorInfo::new(&self.name, &self.ip_address, self.port).with_class(class);
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => info.with_password(password),
            None => info,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(PjlinkError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| PjlinkError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${PROJECTOR_PASSWORD})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| PjlinkError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        self.client_options().validate()?;

        if let Some(seconds) = self.client.group_command_timeout_seconds {
            validate_range("client.group_command_timeout_seconds", seconds, 1.0, 300.0)?;
        }
        if let Some(seconds) = self.client.status_interval_seconds {
            validate_range("client.status_interval_seconds", seconds, 1.0, 3600.0)?;
        }

        validate_port("discovery.port", self.discovery.port)?;
        validate_range("discovery.max_concurrent", self.discovery.max_concurrent, 1, 16)?;
        validate_range("discovery.per_address_wait_ms", self.discovery.per_address_wait_ms, 50, 5000)?;
        validate_ip_address("discovery.broadcast_address", &self.discovery.broadcast_address)?;
        validate_path("presets.path", &self.presets.path)?;

        let mut group_names = HashSet::new();
        for group in &self.groups {
            validate_non_empty_string("groups.name", &group.name)?;
            if !group_names.insert(group.name.as_str()) {
                return Err(PjlinkError::InvalidConfigValueError {
                    field: "groups.name".to_string(),
                    value: group.name.clone(),
                    reason: "Duplicate group name".to_string(),
                });
            }
        }

        let mut projector_ids = HashSet::new();
        for projector in &self.projectors {
            validate_non_empty_string("projectors.name", &projector.name)?;
            validate_ip_address("projectors.ip_address", &projector.ip_address)?;
            validate_port("projectors.port", projector.port)?;
            validate_range("projectors.class", projector.class, 1, 2)?;

            let id = format!("{}:{}", projector.ip_address, projector.port);
            if !projector_ids.insert(id.clone()) {
                return Err(PjlinkError::InvalidConfigValueError {
                    field: "projectors.ip_address".to_string(),
                    value: id,
                    reason: "Duplicate projector address".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::from_provider(self)
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            port: self.discovery.port,
            max_concurrent: self.discovery.max_concurrent,
            per_address_wait: Duration::from_millis(self.discovery.per_address_wait_ms),
            probe_timeout: seconds(self.discovery.probe_timeout_seconds),
            broadcast_address: self
                .discovery
                .broadcast_address
                .parse()
                .unwrap_or(DiscoverySettings::default().broadcast_address),
        }
        .normalized()
    }

    pub fn discovery_timeout(&self) -> Duration {
        seconds(self.discovery.timeout_seconds)
    }

    pub fn group_command_timeout(&self) -> Option<Duration> {
        self.client.group_command_timeout_seconds.map(seconds)
    }

    pub fn status_interval(&self) -> Option<Duration> {
        self.client.status_interval_seconds.map(seconds)
    }

    pub fn presets_path(&self) -> &str {
        &self.presets.path
    }

    /// Groups declared in `[[groups]]` plus any only named by a projector.
    pub fn group_definitions(&self) -> Vec<ProjectorGroup> {
        let mut groups: Vec<ProjectorGroup> = self
            .groups
            .iter()
            .map(|g| {
                ProjectorGroup::with_info(
                    &g.name,
                    &g.description,
                    g.color.unwrap_or(ProjectorGroup::DEFAULT_COLOR),
                )
            })
            .collect();

        for name in self.projectors.iter().flat_map(|p| p.groups.iter()) {
            if !groups.iter().any(|g| &g.name == name) {
                groups.push(ProjectorGroup::new(name));
            }
        }
        groups
    }
}

impl ConfigProvider for TomlConfig {
    fn connect_timeout(&self) -> Duration {
        seconds(self.client.connect_timeout_seconds)
    }

    fn command_timeout(&self) -> Duration {
        seconds(self.client.command_timeout_seconds)
    }

    fn power_on_timeout(&self) -> Duration {
        seconds(self.client.power_on_timeout_seconds)
    }

    fn auto_reconnect(&self) -> bool {
        self.client.auto_reconnect
    }

    fn reconnect_interval(&self) -> Duration {
        seconds(self.client.reconnect_interval_seconds)
    }

    fn max_reconnect_attempts(&self) -> u32 {
        self.client.max_reconnect_attempts
    }

    fn log_communication(&self) -> bool {
        self.client.log_communication
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
