use crate::config::options::ClientOptions;
use crate::core::presets::{GroupPreset, PresetManager};
use crate::domain::model::{
    Command, GroupCommandResult, InputSource, PowerStatus, ProjectorGroup, ProjectorInfo,
    ProjectorStatus,
};
use crate::domain::ports::{ProjectorControl, Storage};
use crate::utils::error::{PjlinkError, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

/// Group name recorded for batch commands that target every projector.
pub const ALL_GROUPS: &str = "AllGroups";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
pub const MIN_STATUS_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_COMMAND_RESULTS: usize = 10;
const STATUS_TIMEOUT_MESSAGE: &str = "Status update timed out";

#[derive(Debug, Clone, PartialEq)]
pub enum GroupChange {
    Created,
    Deleted,
    ProjectorAdded(String),
    ProjectorRemoved(String),
}

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    StatusChanged(ProjectorStatus),
    GroupCommandCompleted(GroupCommandResult),
    GroupChanged { group_name: String, change: GroupChange },
}

/// One fleet-wide operation, applied to each projector of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchOperation {
    Connect,
    Disconnect,
    PowerOn,
    PowerOff,
    SwitchInput(InputSource),
    RequestStatus,
}

impl BatchOperation {
    pub fn command(&self) -> Command {
        match self {
            BatchOperation::SwitchInput(_) => Command::Inpt,
            _ => Command::Powr,
        }
    }

    pub fn parameter(&self) -> String {
        match self {
            BatchOperation::Connect => "CONNECT".to_string(),
            BatchOperation::Disconnect => "DISCONNECT".to_string(),
            BatchOperation::PowerOn => "1".to_string(),
            BatchOperation::PowerOff => "0".to_string(),
            BatchOperation::SwitchInput(source) => source.to_string(),
            BatchOperation::RequestStatus => "?".to_string(),
        }
    }

    async fn apply<P: ProjectorControl>(self, projector: &P) -> Result<()> {
        match self {
            BatchOperation::Connect => {
                if projector.is_connected() {
                    return Ok(());
                }
                projector.connect().await
            }
            BatchOperation::Disconnect => {
                projector.disconnect().await;
                Ok(())
            }
            BatchOperation::PowerOn => projector.power_on().await,
            BatchOperation::PowerOff => projector.power_off().await,
            BatchOperation::SwitchInput(source) => projector.switch_input(source).await,
            BatchOperation::RequestStatus => projector.request_status().await,
        }
    }
}

struct FleetState<P> {
    projectors: BTreeMap<String, Arc<P>>,
    groups: BTreeMap<String, ProjectorGroup>,
    statuses: BTreeMap<String, ProjectorStatus>,
    command_results: VecDeque<GroupCommandResult>,
}

/// Owns a fleet of projectors, their groups and their health records.
pub struct ProjectorManager<P: ProjectorControl> {
    options: ClientOptions,
    state: Mutex<FleetState<P>>,
    command_timeout: Mutex<Duration>,
    status_updates_enabled: AtomicBool,
    events: broadcast::Sender<ManagerEvent>,
}

impl<P: ProjectorControl> ProjectorManager<P> {
    pub fn new(options: ClientOptions) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            options,
            state: Mutex::new(FleetState {
                projectors: BTreeMap::new(),
                groups: BTreeMap::new(),
                statuses: BTreeMap::new(),
                command_results: VecDeque::new(),
            }),
            command_timeout: Mutex::new(DEFAULT_COMMAND_TIMEOUT),
            status_updates_enabled: AtomicBool::new(true),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    // ---- projectors ----

    /// Adds a projector; an existing one with the same `ip:port` is returned unchanged.
    pub fn add_projector(&self, info: ProjectorInfo, group_name: Option<&str>) -> Arc<P> {
        let id = info.projector_id();
        let (projector, added) = {
            let mut state = self.fleet();
            match state.projectors.get(&id) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    state.statuses.insert(id.clone(), ProjectorStatus::new(&info));
                    let projector = Arc::new(P::create(info, self.options.clone()));
                    state.projectors.insert(id.clone(), Arc::clone(&projector));
                    (projector, true)
                }
            }
        };

        if added {
            tracing::info!("Added projector {}", id);
        } else {
            tracing::warn!("Projector {} already registered", id);
        }

        if let Some(group_name) = group_name {
            if !self.group_exists(group_name) {
                self.create_group(group_name);
            }
            self.add_to_group(group_name, &id);
        }
        projector
    }

    /// Removes a projector along with its group memberships and status record.
    pub fn remove_projector(&self, projector_id: &str) -> bool {
        let removed = {
            let mut state = self.fleet();
            state.statuses.remove(projector_id);
            state.projectors.remove(projector_id).is_some()
        };
        if removed {
            self.remove_from_all_groups(projector_id);
            tracing::info!("Removed projector {}", projector_id);
        }
        removed
    }

    pub fn projector(&self, projector_id: &str) -> Option<Arc<P>> {
        self.fleet().projectors.get(projector_id).cloned()
    }

    pub fn all_projectors(&self) -> Vec<Arc<P>> {
        self.fleet().projectors.values().cloned().collect()
    }

    pub fn projector_count(&self) -> usize {
        self.fleet().projectors.len()
    }

    // ---- groups ----

    pub fn create_group(&self, group_name: &str) -> bool {
        self.insert_group(ProjectorGroup::new(group_name))
    }

    pub fn create_group_with_info(&self, group_name: &str, description: &str, color: [f32; 4]) -> bool {
        self.insert_group(ProjectorGroup::with_info(group_name, description, color))
    }

    pub fn delete_group(&self, group_name: &str) -> bool {
        let removed = self.fleet().groups.remove(group_name).is_some();
        if removed {
            self.group_changed(group_name, GroupChange::Deleted);
        }
        removed
    }

    pub fn group_info(&self, group_name: &str) -> Option<ProjectorGroup> {
        self.fleet().groups.get(group_name).cloned()
    }

    pub fn group_exists(&self, group_name: &str) -> bool {
        self.fleet().groups.contains_key(group_name)
    }

    pub fn group_names(&self) -> Vec<String> {
        self.fleet().groups.keys().cloned().collect()
    }

    pub fn all_groups(&self) -> Vec<ProjectorGroup> {
        self.fleet().groups.values().cloned().collect()
    }

    /// Both the group and the projector must exist.
    pub fn add_to_group(&self, group_name: &str, projector_id: &str) -> bool {
        let added = {
            let mut state = self.fleet();
            if !state.projectors.contains_key(projector_id) {
                return false;
            }
            match state.groups.get_mut(group_name) {
                Some(group) => group.add_projector_id(projector_id),
                None => return false,
            }
        };
        if added {
            self.group_changed(group_name, GroupChange::ProjectorAdded(projector_id.to_string()));
        }
        added
    }

    pub fn remove_from_group(&self, group_name: &str, projector_id: &str) -> bool {
        let removed = self
            .fleet()
            .groups
            .get_mut(group_name)
            .map(|g| g.remove_projector_id(projector_id))
            .unwrap_or(false);
        if removed {
            self.group_changed(group_name, GroupChange::ProjectorRemoved(projector_id.to_string()));
        }
        removed
    }

    /// Returns the number of groups the projector was removed from.
    pub fn remove_from_all_groups(&self, projector_id: &str) -> usize {
        let affected: Vec<String> = {
            let mut state = self.fleet();
            state
                .groups
                .values_mut()
                .filter_map(|g| g.remove_projector_id(projector_id).then(|| g.name.clone()))
                .collect()
        };
        for group_name in &affected {
            self.group_changed(group_name, GroupChange::ProjectorRemoved(projector_id.to_string()));
        }
        affected.len()
    }

    pub fn is_in_group(&self, projector_id: &str, group_name: &str) -> bool {
        self.fleet()
            .groups
            .get(group_name)
            .map(|g| g.contains_projector_id(projector_id))
            .unwrap_or(false)
    }

    pub fn projectors_in_group(&self, group_name: &str) -> Vec<Arc<P>> {
        let state = self.fleet();
        let Some(group) = state.groups.get(group_name) else {
            return Vec::new();
        };
        group
            .projector_ids
            .iter()
            .filter_map(|id| state.projectors.get(id).cloned())
            .collect()
    }

    // ---- batch commands ----

    pub async fn connect_all(&self) -> GroupCommandResult {
        self.run_on_all(BatchOperation::Connect).await
    }

    pub async fn connect_group(&self, group_name: &str) -> Result<GroupCommandResult> {
        self.run_on_group(group_name, BatchOperation::Connect).await
    }

    pub async fn disconnect_all(&self) -> GroupCommandResult {
        self.run_on_all(BatchOperation::Disconnect).await
    }

    pub async fn disconnect_group(&self, group_name: &str) -> Result<GroupCommandResult> {
        self.run_on_group(group_name, BatchOperation::Disconnect).await
    }

    pub async fn power_on_all(&self) -> GroupCommandResult {
        self.run_on_all(BatchOperation::PowerOn).await
    }

    pub async fn power_on_group(&self, group_name: &str) -> Result<GroupCommandResult> {
        self.run_on_group(group_name, BatchOperation::PowerOn).await
    }

    pub async fn power_off_all(&self) -> GroupCommandResult {
        self.run_on_all(BatchOperation::PowerOff).await
    }

    pub async fn power_off_group(&self, group_name: &str) -> Result<GroupCommandResult> {
        self.run_on_group(group_name, BatchOperation::PowerOff).await
    }

    pub async fn switch_input_all(&self, source: InputSource) -> GroupCommandResult {
        self.run_on_all(BatchOperation::SwitchInput(source)).await
    }

    pub async fn switch_input_group(&self, group_name: &str, source: InputSource) -> Result<GroupCommandResult> {
        self.run_on_group(group_name, BatchOperation::SwitchInput(source)).await
    }

    pub async fn request_status_all(&self) -> GroupCommandResult {
        self.run_on_all(BatchOperation::RequestStatus).await
    }

    pub async fn request_status_group(&self, group_name: &str) -> Result<GroupCommandResult> {
        self.run_on_group(group_name, BatchOperation::RequestStatus).await
    }

    pub async fn run_on_all(&self, operation: BatchOperation) -> GroupCommandResult {
        let projectors = self.all_projectors();
        self.run_batch(ALL_GROUPS, operation, projectors).await
    }

    pub async fn run_on_group(&self, group_name: &str, operation: BatchOperation) -> Result<GroupCommandResult> {
        if !self.group_exists(group_name) {
            return Err(PjlinkError::GroupError {
                message: format!("group '{}' not found", group_name),
            });
        }
        let projectors = self.projectors_in_group(group_name);
        Ok(self.run_batch(group_name, operation, projectors).await)
    }

    pub fn group_command_result(&self, command_id: &str) -> Option<GroupCommandResult> {
        self.fleet()
            .command_results
            .iter()
            .find(|r| r.command_id == command_id)
            .cloned()
    }

    pub fn latest_group_command_result(&self) -> Option<GroupCommandResult> {
        self.fleet().command_results.back().cloned()
    }

    pub fn is_command_completed(&self, command_id: &str) -> bool {
        self.group_command_result(command_id)
            .map(|r| r.is_completed())
            .unwrap_or(false)
    }

    pub fn set_command_timeout(&self, wait: Duration) {
        *self.command_timeout.lock().unwrap_or_else(PoisonError::into_inner) = wait.max(MIN_COMMAND_TIMEOUT);
    }

    pub fn command_timeout(&self) -> Duration {
        *self.command_timeout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- status tracking ----

    pub fn projector_status(&self, projector_id: &str) -> Option<ProjectorStatus> {
        self.fleet().statuses.get(projector_id).cloned()
    }

    pub fn all_statuses(&self) -> Vec<ProjectorStatus> {
        self.fleet().statuses.values().cloned().collect()
    }

    pub fn group_statuses(&self, group_name: &str) -> Vec<ProjectorStatus> {
        let state = self.fleet();
        let Some(group) = state.groups.get(group_name) else {
            return Vec::new();
        };
        group
            .projector_ids
            .iter()
            .filter_map(|id| state.statuses.get(id).cloned())
            .collect()
    }

    pub fn unhealthy_statuses(&self) -> Vec<ProjectorStatus> {
        self.fleet()
            .statuses
            .values()
            .filter(|s| !s.is_healthy)
            .cloned()
            .collect()
    }

    /// Queries every connected projector; disconnected ones are recorded as connection failures.
    pub async fn update_all_statuses(&self) {
        let wait = self.command_timeout();
        let mut queries = JoinSet::new();

        for projector in self.all_projectors() {
            let id = projector.projector_id();
            if !projector.is_connected() {
                self.update_status(&id, |s| s.record_connection_failure());
                continue;
            }
            self.update_status(&id, |s| s.record_command_sent());
            queries.spawn(async move {
                let outcome = timeout(wait, projector.request_status()).await;
                (projector, outcome)
            });
        }

        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((projector, Ok(outcome))) => self.record_outcome(projector.as_ref(), outcome.as_ref().err()),
                Ok((projector, Err(_))) => {
                    let id = projector.projector_id();
                    tracing::warn!("Status update timed out for {}", id);
                    self.update_status(&id, |s| s.record_command_failure(STATUS_TIMEOUT_MESSAGE));
                }
                Err(e) => tracing::warn!("Status update task failed: {}", e),
            }
        }
    }

    pub fn set_status_updates_enabled(&self, enabled: bool) {
        self.status_updates_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn status_updates_enabled(&self) -> bool {
        self.status_updates_enabled.load(Ordering::SeqCst)
    }

    pub fn spawn_status_updates(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = interval.max(MIN_STATUS_UPDATE_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if manager.status_updates_enabled() {
                    manager.update_all_statuses().await;
                }
            }
        })
    }

    // ---- group presets ----

    /// Captures the group's projectors (and the state of a connected one) and persists it.
    pub async fn save_group_preset<S: Storage>(
        &self,
        presets: &mut PresetManager<S>,
        preset_name: &str,
        group_name: &str,
        description: &str,
    ) -> Result<()> {
        if !self.group_exists(group_name) {
            return Err(PjlinkError::GroupError {
                message: format!("group '{}' not found", group_name),
            });
        }

        let mut preset = GroupPreset::new(preset_name, group_name);
        preset.description = description.to_string();
        for projector in self.projectors_in_group(group_name) {
            preset.add_projector_setting(projector.info());
            if projector.is_connected() {
                preset.power_status = projector.power_status();
                preset.input_source = projector.input_source();
            }
        }

        let count = preset.projector_count();
        presets.save_group_preset(preset)?;
        presets.save().await?;
        tracing::info!(
            "Saved group preset {} (group {}, {} projectors)",
            preset_name,
            group_name,
            count
        );
        Ok(())
    }

    /// Recreates a saved group: known projectors get the stored settings, new ones are added
    /// and connected, and connected ones receive the stored power state and input.
    pub async fn load_group_preset<S: Storage>(
        &self,
        presets: &PresetManager<S>,
        preset_name: &str,
    ) -> Result<usize> {
        let preset = presets
            .group_preset(preset_name)
            .cloned()
            .ok_or_else(|| PjlinkError::PresetError {
                message: format!("group preset '{}' not found", preset_name),
            })?;

        if !self.group_exists(&preset.group_name) {
            self.create_group(&preset.group_name);
        }

        for (projector_id, info) in &preset.projector_settings {
            match self.projector(projector_id) {
                Some(projector) => {
                    projector.set_info(info.clone());
                    self.add_to_group(&preset.group_name, projector_id);
                    if projector.is_connected() {
                        self.apply_preset_state(projector.as_ref(), &preset).await;
                    }
                }
                None => {
                    let projector = self.add_projector(info.clone(), Some(&preset.group_name));
                    if let Err(e) = projector.connect().await {
                        tracing::warn!("Could not connect {}: {}", projector_id, e);
                    }
                    self.record_outcome(projector.as_ref(), None);
                }
            }
        }

        tracing::info!(
            "Loaded group preset {} (group {}, {} projectors)",
            preset_name,
            preset.group_name,
            preset.projector_count()
        );
        Ok(preset.projector_count())
    }

    async fn apply_preset_state(&self, projector: &P, preset: &GroupPreset) {
        let power = match preset.power_status {
            PowerStatus::PoweredOn => Some(projector.power_on().await),
            PowerStatus::PoweredOff => Some(projector.power_off().await),
            _ => None,
        };
        if let Some(Err(e)) = power {
            tracing::warn!("Preset power change failed for {}: {}", projector.projector_id(), e);
        }
        if preset.input_source != InputSource::Unknown {
            if let Err(e) = projector.switch_input(preset.input_source).await {
                tracing::warn!("Preset input change failed for {}: {}", projector.projector_id(), e);
            }
        }
    }

    async fn run_batch(
        &self,
        group_name: &str,
        operation: BatchOperation,
        projectors: Vec<Arc<P>>,
    ) -> GroupCommandResult {
        let ids: Vec<String> = projectors.iter().map(|p| p.projector_id()).collect();
        let mut result = GroupCommandResult::new(group_name, operation.command(), operation.parameter(), ids);
        let wait = self.command_timeout();

        let mut tasks = JoinSet::new();
        for projector in projectors {
            self.update_status(&projector.projector_id(), |s| s.record_command_sent());
            tasks.spawn(async move {
                let outcome = timeout(wait, operation.apply(projector.as_ref())).await;
                (projector, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (projector, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!("Batch task failed: {}", e);
                    continue;
                }
            };
            let id = projector.projector_id();
            match outcome {
                Ok(Ok(())) => {
                    result.add_success(&id, "OK");
                    if operation == BatchOperation::Connect {
                        self.update_status(&id, |s| s.reset_counters());
                    }
                    self.record_outcome(projector.as_ref(), None);
                }
                Ok(Err(e)) => {
                    result.add_failure(&id, &e.to_string());
                    self.record_outcome(projector.as_ref(), Some(&e));
                }
                Err(_) => tracing::warn!("{} did not respond within {:?}", id, wait),
            }
        }

        result.handle_timeout();
        tracing::info!(
            "Group command {} {} {} on {}: {}/{} succeeded",
            result.command_id,
            result.command,
            result.parameter,
            group_name,
            result.success_count,
            result.total_projectors
        );

        {
            let mut state = self.fleet();
            state.command_results.push_back(result.clone());
            while state.command_results.len() > MAX_COMMAND_RESULTS {
                state.command_results.pop_front();
            }
        }
        self.emit(ManagerEvent::GroupCommandCompleted(result.clone()));
        result
    }

    fn record_outcome(&self, projector: &P, error: Option<&PjlinkError>) {
        let connected = projector.is_connected();
        let power = projector.power_status();
        let input = projector.input_source();
        let id = projector.projector_id();

        self.update_status(&id, |status| match error {
            None => status.update_status(power, input, connected, ""),
            Some(e) => {
                let message = e.to_string();
                if connected {
                    status.record_command_failure(&message);
                } else {
                    status.record_connection_failure();
                }
                status.update_status(power, input, connected, &message);
            }
        });
    }

    fn update_status(&self, projector_id: &str, apply: impl FnOnce(&mut ProjectorStatus)) {
        let status = {
            let mut state = self.fleet();
            let Some(status) = state.statuses.get_mut(projector_id) else {
                return;
            };
            apply(status);
            status.clone()
        };
        self.emit(ManagerEvent::StatusChanged(status));
    }

    fn insert_group(&self, group: ProjectorGroup) -> bool {
        if group.name.trim().is_empty() {
            return false;
        }
        let name = group.name.clone();
        {
            let mut state = self.fleet();
            if state.groups.contains_key(&name) {
                return false;
            }
            state.groups.insert(name.clone(), group);
        }
        self.group_changed(&name, GroupChange::Created);
        true
    }

    fn group_changed(&self, group_name: &str, change: GroupChange) {
        tracing::debug!("Group {}: {:?}", group_name, change);
        self.emit(ManagerEvent::GroupChanged {
            group_name: group_name.to_string(),
            change,
        });
    }

    fn fleet(&self) -> MutexGuard<'_, FleetState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }
}
