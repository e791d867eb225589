pub mod cli;
pub mod options;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use self::cli_args::{CliCommand, CliConfig, DiscoverMode, MuteTarget, PresetAction};

#[cfg(feature = "cli")]
mod cli_args {
    use crate::config::options::{duration_from_secs, ClientOptions};
    use crate::core::ConfigProvider;
    use crate::domain::model::{AvMuteTarget, DeviceClass, ProjectorInfo};
    use crate::utils::error::{PjlinkError, Result};
    use crate::utils::validation::{
        validate_ip_address, validate_port, validate_range, validate_required_field, Validate,
    };
    use clap::{Parser, Subcommand, ValueEnum};
    use std::time::Duration;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "pjlink")]
    #[command(about = "Control PJLink projectors from the command line")]
    pub struct CliConfig {
        /// Projector IPv4 address
        #[arg(long, global = true)]
        pub host: Option<String>,

        #[arg(long, global = true, default_value_t = 4352)]
        pub port: u16,

        /// PJLink password, if the projector requires authentication
        #[arg(long, global = true)]
        pub password: Option<String>,

        /// PJLink class (1 or 2)
        #[arg(long, global = true, default_value_t = 1)]
        pub class: u8,

        /// Load the projector from a saved preset instead of --host
        #[arg(long, global = true)]
        pub preset: Option<String>,

        #[arg(long, global = true, default_value = "./presets")]
        pub presets_dir: String,

        #[arg(long, global = true, default_value_t = 5.0)]
        pub connect_timeout: f64,

        #[arg(long, global = true, default_value_t = 5.0)]
        pub command_timeout: f64,

        #[arg(long, global = true, default_value_t = 10.0)]
        pub power_on_timeout: f64,

        /// Do not reconnect automatically when the link drops
        #[arg(long, global = true)]
        pub no_reconnect: bool,

        /// Log every line sent to and received from the projector
        #[arg(long, global = true)]
        pub log_communication: bool,

        #[arg(short, long, global = true, help = "Enable verbose output")]
        pub verbose: bool,

        #[command(subcommand)]
        pub command: CliCommand,
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum CliCommand {
        /// Show power, input and identification
        Status,
        PowerOn,
        PowerOff,
        /// Switch input: rgb, video, digital (hdmi), storage (usb), network
        Input {
            source: String,
            #[arg(long, default_value_t = '1')]
            channel: char,
        },
        /// Mute or unmute picture and/or sound
        Mute {
            #[arg(value_enum, default_value_t = MuteTarget::All)]
            target: MuteTarget,
            #[arg(long)]
            off: bool,
        },
        Errors,
        Lamps,
        /// List the inputs the projector offers
        Inputs,
        /// Send a raw command, e.g. `raw INF1` or `raw AVMT 31`
        Raw {
            command: String,
            parameter: Option<String>,
        },
        /// Print the diagnostic report
        Report,
        Discover {
            /// Save every device found as a preset
            #[arg(long)]
            save: bool,
            #[command(subcommand)]
            mode: DiscoverMode,
        },
        Preset {
            #[command(subcommand)]
            action: PresetAction,
        },
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum DiscoverMode {
        Broadcast {
            #[arg(long, default_value_t = 5.0)]
            timeout: f64,
        },
        Range {
            start: String,
            end: String,
            #[arg(long, default_value_t = 10.0)]
            timeout: f64,
        },
        Subnet {
            subnet: String,
            #[arg(default_value = "255.255.255.0")]
            mask: String,
            #[arg(long, default_value_t = 20.0)]
            timeout: f64,
        },
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum PresetAction {
        /// Save the --host projector under a name
        Save { name: String },
        List,
        Show { name: String },
        Delete { name: String },
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
    pub enum MuteTarget {
        Video,
        Audio,
        All,
    }

    impl From<MuteTarget> for AvMuteTarget {
        fn from(target: MuteTarget) -> Self {
            match target {
                MuteTarget::Video => AvMuteTarget::Video,
                MuteTarget::Audio => AvMuteTarget::Audio,
                MuteTarget::All => AvMuteTarget::AudioVideo,
            }
        }
    }

    impl CliCommand {
        /// Whether the command talks to a single projector.
        pub fn needs_projector(&self) -> bool {
            match self {
                CliCommand::Discover { .. } => false,
                CliCommand::Preset { action } => matches!(action, PresetAction::Save { .. }),
                _ => true,
            }
        }
    }

    impl CliConfig {
        pub fn client_options(&self) -> ClientOptions {
            ClientOptions::from_provider(self)
        }

        /// The projector described by --host, --port, --class and --password.
        pub fn projector_info(&self) -> Result<ProjectorInfo> {
            let host = validate_required_field("host", &self.host)?.as_str();
            let class = if self.class == 2 {
                DeviceClass::Class2
            } else {
                DeviceClass::Class1
            };
            let info = ProjectorInfo::new(host, host, self.port).with_class(class);
            Ok(match self.password.as_deref().filter(|p| !p.is_empty()) {
                Some(password) => info.with_password(password),
                None => info,
            })
        }
    }

    impl ConfigProvider for CliConfig {
        fn connect_timeout(&self) -> Duration {
            duration_from_secs(self.connect_timeout)
        }

        fn command_timeout(&self) -> Duration {
            duration_from_secs(self.command_timeout)
        }

        fn power_on_timeout(&self) -> Duration {
            duration_from_secs(self.power_on_timeout)
        }

        fn auto_reconnect(&self) -> bool {
            !self.no_reconnect
        }

        fn reconnect_interval(&self) -> Duration {
            ClientOptions::default().reconnect_interval
        }

        fn max_reconnect_attempts(&self) -> u32 {
            ClientOptions::default().max_reconnect_attempts
        }

        fn log_communication(&self) -> bool {
            self.log_communication
        }
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            self.client_options().validate()?;
            validate_port("port", self.port)?;
            validate_range("class", self.class, 1, 2)?;

            if let Some(host) = &self.host {
                validate_ip_address("host", host)?;
            }
            if self.command.needs_projector() && self.host.is_none() && self.preset.is_none() {
                return Err(PjlinkError::MissingConfigError {
                    field: "host".to_string(),
                });
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_power_on() {
            let config =
                CliConfig::try_parse_from(["pjlink", "--host", "10.0.0.5", "--password", "pw", "power-on"])
                    .unwrap();
            assert!(config.validate().is_ok());
            assert!(matches!(config.command, CliCommand::PowerOn));

            let info = config.projector_info().unwrap();
            assert_eq!(info.projector_id(), "10.0.0.5:4352");
            assert!(info.requires_authentication);
        }

        #[test]
        fn test_global_options_after_subcommand() {
            let config = CliConfig::try_parse_from([
                "pjlink",
                "input",
                "hdmi",
                "--host",
                "10.0.0.5",
                "--no-reconnect",
                "--command-timeout",
                "2.5",
            ])
            .unwrap();
            let options = config.client_options();
            assert!(!options.auto_reconnect);
            assert_eq!(options.command_timeout, Duration::from_millis(2500));
            match config.command {
                CliCommand::Input { source, channel } => {
                    assert_eq!(source, "hdmi");
                    assert_eq!(channel, '1');
                }
                other => panic!("unexpected command {:?}", other),
            }
        }

        #[test]
        fn test_host_required_for_projector_commands() {
            let config = CliConfig::try_parse_from(["pjlink", "status"]).unwrap();
            assert!(config.validate().is_err());

            assert!(matches!(
                config.projector_info(),
                Err(PjlinkError::MissingConfigError { field }) if field == "host"
            ));

            let config = CliConfig::try_parse_from(["pjlink", "--preset", "lobby", "status"]).unwrap();
            assert!(config.validate().is_ok());

            let config =
                CliConfig::try_parse_from(["pjlink", "discover", "range", "10.0.0.1", "10.0.0.20"]).unwrap();
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_invalid_values_rejected() {
            let config =
                CliConfig::try_parse_from(["pjlink", "--host", "projector.local", "status"]).unwrap();
            assert!(config.validate().is_err());

            let config =
                CliConfig::try_parse_from(["pjlink", "--host", "10.0.0.5", "--class", "3", "status"]).unwrap();
            assert!(config.validate().is_err());

            let config = CliConfig::try_parse_from([
                "pjlink",
                "--host",
                "10.0.0.5",
                "--connect-timeout",
                "0",
                "status",
            ])
            .unwrap();
            assert!(config.validate().is_err());
        }
    }
}
