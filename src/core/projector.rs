use crate::config::options::ClientOptions;
use crate::core::client::{ClientEvent, ProjectorClient};
use crate::core::presets::PresetManager;
use crate::core::state_machine::{ProjectorState, ProjectorStateMachine, StateTransition};
use crate::domain::model::{
    AvMuteState, AvMuteTarget, Command, ErrorStatus, InputSource, LampStatus, PowerStatus,
    ProjectorInfo,
};
use crate::domain::ports::{ProjectorControl, Storage};
use crate::utils::error::{PjlinkError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const MIN_STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// A projector: one client connection plus the state machine that gates commands.
pub struct Projector {
    client: ProjectorClient,
    state: Mutex<ProjectorStateMachine>,
    transitions: broadcast::Sender<StateTransition>,
    wants_connection: AtomicBool,
}

impl Projector {
    pub fn new(info: ProjectorInfo, options: ClientOptions) -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            client: ProjectorClient::new(info, options),
            state: Mutex::new(ProjectorStateMachine::new()),
            transitions,
            wants_connection: AtomicBool::new(false),
        }
    }

    pub fn from_preset<S: Storage>(
        presets: &PresetManager<S>,
        preset_name: &str,
        options: ClientOptions,
    ) -> Result<Self> {
        let info = presets
            .load_preset(preset_name)
            .ok_or_else(|| PjlinkError::PresetError {
                message: format!("preset '{}' not found", preset_name),
            })?;
        Ok(Self::new(info, options))
    }

    pub fn client(&self) -> &ProjectorClient {
        &self.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.client.subscribe()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub fn state(&self) -> ProjectorState {
        self.machine().state()
    }

    pub fn state_error_message(&self) -> String {
        self.machine().error_message().to_string()
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_connected() && self.client.info().power_status == PowerStatus::PoweredOn
    }

    pub fn can_execute(&self, command: Command) -> bool {
        self.client.is_connected() && self.machine().can_perform(command)
    }

    pub async fn connect(&self) -> Result<()> {
        self.wants_connection.store(true, Ordering::SeqCst);
        self.transition(|m| m.set_state(ProjectorState::Connecting));

        match self.client.connect().await {
            Ok(()) => {
                self.transition(|m| m.set_state(ProjectorState::Connected));
                if let Err(e) = self.request_status().await {
                    tracing::warn!("Initial status request failed: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                self.transition(|m| m.set_state(ProjectorState::Disconnected));
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) {
        self.wants_connection.store(false, Ordering::SeqCst);
        self.client.disconnect().await;
        self.transition(|m| m.update_from_connection_status(false));
    }

    pub async fn power_on(&self) -> Result<()> {
        self.ensure_allowed(Command::Powr)?;
        let result = self.client.power_on().await;
        self.after_command(result)
    }

    pub async fn power_off(&self) -> Result<()> {
        self.ensure_allowed(Command::Powr)?;
        let result = self.client.power_off().await;
        self.after_command(result)
    }

    pub async fn switch_input(&self, source: InputSource) -> Result<()> {
        self.switch_input_channel(source, '1').await
    }

    pub async fn switch_input_channel(&self, source: InputSource, channel: char) -> Result<()> {
        self.ensure_allowed(Command::Inpt)?;
        let result = self.client.switch_input_channel(source, channel).await;
        self.after_command(result)
    }

    pub async fn set_av_mute(&self, target: AvMuteTarget, muted: bool) -> Result<()> {
        self.ensure_allowed(Command::Avmt)?;
        let result = self.client.set_av_mute(target, muted).await;
        self.after_command(result)
    }

    pub async fn av_mute_state(&self) -> Result<AvMuteState> {
        self.ensure_allowed(Command::Avmt)?;
        let result = self.client.av_mute_state().await;
        self.after_command(result)
    }

    pub async fn error_status(&self) -> Result<ErrorStatus> {
        self.ensure_allowed(Command::Erst)?;
        let result = self.client.error_status().await;
        self.after_command(result)
    }

    pub async fn lamp_status(&self) -> Result<Vec<LampStatus>> {
        self.ensure_allowed(Command::Lamp)?;
        let result = self.client.lamp_status().await;
        self.after_command(result)
    }

    pub async fn available_inputs(&self) -> Result<Vec<(InputSource, char)>> {
        self.ensure_allowed(Command::Inst)?;
        let result = self.client.available_inputs().await;
        self.after_command(result)
    }

    /// Sends an arbitrary command; the reply parameter is returned as text.
    pub async fn send_raw(&self, command: Command, parameter: &str) -> Result<String> {
        self.ensure_allowed(command)?;
        let wait = self.client.options().command_timeout;
        let result = self.client.execute(command, parameter, wait).await;
        self.after_command(result)
    }

    /// Queries the status commands the current state allows.
    pub async fn request_status(&self) -> Result<()> {
        if !self.client.is_connected() {
            return Err(PjlinkError::NotConnectedError);
        }

        let mut first_error = None;
        // POWR first: its answer decides which of the remaining queries are allowed.
        for command in crate::core::client::STATUS_COMMANDS {
            if !self.machine().can_perform(command) {
                continue;
            }
            let result = self.client.query(command).await.map(|_| ());
            if let Err(e) = self.after_command(result) {
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

    /// Leaves the error state and refreshes the status.
    pub async fn clear_error(&self) -> Result<()> {
        self.transition(|m| m.reset_error());
        self.request_status().await
    }

    /// Periodic check: refresh when connected, reconnect when the link dropped.
    pub async fn check_status(&self) {
        let connected = self.client.is_connected();
        self.transition(|m| m.update_from_connection_status(connected));

        if connected {
            if let Err(e) = self.request_status().await {
                tracing::debug!("Periodic status check failed: {}", e);
            }
        } else if self.wants_connection.load(Ordering::SeqCst)
            && self.client.options().auto_reconnect
        {
            match self.client.reconnect().await {
                Ok(()) => {
                    self.transition(|m| m.set_state(ProjectorState::Connected));
                    if let Err(e) = self.request_status().await {
                        tracing::debug!("Status request after reconnect failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Reconnect failed: {}", e),
            }
        }
    }

    pub fn spawn_status_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let projector = Arc::clone(self);
        let interval = interval.max(MIN_STATUS_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                projector.check_status().await;
            }
        })
    }

    pub fn save_as_preset<S: Storage>(
        &self,
        presets: &mut PresetManager<S>,
        preset_name: &str,
    ) -> Result<()> {
        presets.save_preset(preset_name, self.client.info())
    }

    pub fn generate_diagnostic_report(&self) -> String {
        let mut report = self.client.generate_diagnostic_report();
        report.push_str(&format!("State: {}\n", self.state()));
        let message = self.state_error_message();
        if !message.is_empty() {
            report.push_str(&format!("State Error: {}\n", message));
        }
        report
    }

    fn ensure_allowed(&self, command: Command) -> Result<()> {
        if !self.client.is_connected() {
            return Err(PjlinkError::NotConnectedError);
        }
        let machine = self.machine();
        if !machine.can_perform(command) {
            return Err(PjlinkError::CommandNotAllowedError {
                command,
                state: machine.state().to_string(),
            });
        }
        Ok(())
    }

    fn after_command<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                let power = self.client.info().power_status;
                self.transition(|m| m.update_from_power_status(power));
            }
            Err(PjlinkError::CommandRejectedError { command, status }) => {
                let message = format!("Error in command {}: {}", command, status);
                self.transition(|m| m.set_error_state(message));
            }
            Err(_) => {
                if !self.client.is_connected() {
                    self.transition(|m| m.update_from_connection_status(false));
                }
            }
        }
        result
    }

    fn machine(&self) -> MutexGuard<'_, ProjectorStateMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, apply: impl FnOnce(&mut ProjectorStateMachine) -> Option<StateTransition>) {
        let transition = apply(&mut self.machine());
        if let Some(transition) = transition {
            let _ = self.transitions.send(transition);
        }
    }
}

#[async_trait]
impl ProjectorControl for Projector {
    fn create(info: ProjectorInfo, options: ClientOptions) -> Self {
        Projector::new(info, options)
    }

    fn info(&self) -> ProjectorInfo {
        self.client.info()
    }

    fn set_info(&self, info: ProjectorInfo) {
        self.client.set_info(info);
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn last_error_message(&self) -> String {
        self.client.last_error_message()
    }

    async fn connect(&self) -> Result<()> {
        Projector::connect(self).await
    }

    async fn disconnect(&self) {
        Projector::disconnect(self).await
    }

    async fn power_on(&self) -> Result<()> {
        Projector::power_on(self).await
    }

    async fn power_off(&self) -> Result<()> {
        Projector::power_off(self).await
    }

    async fn switch_input(&self, source: InputSource) -> Result<()> {
        Projector::switch_input(self, source).await
    }

    async fn request_status(&self) -> Result<()> {
        Projector::request_status(self).await
    }
}
