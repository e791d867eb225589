pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

/// Name of the plugin module this crate implements.
pub const MODULE_NAME: &str = "PJLink";

/// Host modules the plugin links against publicly.
pub const PUBLIC_DEPENDENCIES: [&str; 9] = [
    "Core",
    "CoreUObject",
    "Engine",
    "InputCore",
    "Projects",
    "Sockets",
    "Networking",
    "Json",
    "JsonUtilities",
];

/// Host modules used only by the plugin's UI code.
pub const PRIVATE_DEPENDENCIES: [&str; 2] = ["Slate", "SlateCore"];

pub use config::cli::LocalStorage;
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{options::ClientOptions, toml_config::TomlConfig};

pub use core::{
    client::{ClientEvent, ProjectorClient},
    discovery::{DiscoveryEvent, DiscoveryManager, DiscoverySettings},
    manager::{ManagerEvent, ProjectorManager},
    presets::{GroupPreset, PresetManager},
    projector::Projector,
    state_machine::ProjectorState,
};
pub use domain::model::{
    Command, DeviceClass, InputSource, PowerStatus, ProjectorGroup, ProjectorInfo,
};
pub use utils::error::{PjlinkError, Result};
