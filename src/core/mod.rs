pub mod client;
pub mod diagnostics;
pub mod discovery;
pub mod manager;
pub mod presets;
pub mod projector;
pub mod protocol;
pub mod state_machine;

pub use crate::domain::model::{Command, InputSource, PowerStatus, ProjectorInfo};
pub use crate::domain::ports::{ConfigProvider, ProjectorControl, Storage};
pub use crate::utils::error::Result;
