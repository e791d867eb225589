use crate::config::options::ClientOptions;
use crate::domain::model::{InputSource, PowerStatus, ProjectorInfo};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn connect_timeout(&self) -> Duration;
    fn command_timeout(&self) -> Duration;
    fn power_on_timeout(&self) -> Duration;
    fn auto_reconnect(&self) -> bool;
    fn reconnect_interval(&self) -> Duration;
    fn max_reconnect_attempts(&self) -> u32;
    fn log_communication(&self) -> bool;
}

/// A controllable projector as seen by the fleet manager.
#[async_trait]
pub trait ProjectorControl: Send + Sync + 'static {
    fn create(info: ProjectorInfo, options: ClientOptions) -> Self
    where
        Self: Sized;

    fn info(&self) -> ProjectorInfo;
    fn set_info(&self, info: ProjectorInfo);
    fn is_connected(&self) -> bool;

    fn projector_id(&self) -> String {
        self.info().projector_id()
    }

    fn power_status(&self) -> PowerStatus {
        self.info().power_status
    }

    fn input_source(&self) -> InputSource {
        self.info().current_input
    }

    fn last_error_message(&self) -> String;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self);
    async fn power_on(&self) -> Result<()>;
    async fn power_off(&self) -> Result<()>;
    async fn switch_input(&self, source: InputSource) -> Result<()>;
    async fn request_status(&self) -> Result<()>;
}
