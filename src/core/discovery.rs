//! Finding PJLink projectors on the network.
//!
//! Three strategies share one bookkeeping model: a UDP broadcast (class 2 `SRCH`
//! plus a class 1 `CLSS` query) and TCP scans over an address range or a subnet.
//! Each run gets an id; progress, results and completion are published as
//! [`DiscoveryEvent`]s and can be polled with [`DiscoveryManager::status`].

use crate::core::manager::ProjectorManager;
use crate::core::presets::PresetManager;
use crate::core::protocol::{self, build_command, parse_response, Greeting, SEARCH_COMMAND};
use crate::domain::model::{
    Command, DeviceClass, DiscoveryResult, DiscoveryStatus, ProjectorInfo, DEFAULT_PJLINK_PORT,
};
use crate::domain::ports::{ProjectorControl, Storage};
use crate::utils::error::{PjlinkError, Result};
use crate::utils::validation::validate_subnet_mask;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RANGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SUBNET_TIMEOUT: Duration = Duration::from_secs(20);
pub const MAX_SCAN_ADDRESSES: u32 = 65_536;

const BROADCAST_SETUP_RETRIES: u32 = 3;
const BROADCAST_RETRY_DELAY: Duration = Duration::from_millis(500);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_STEP: f32 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    pub port: u16,
    pub max_concurrent: usize,
    /// Delay between launching consecutive address probes.
    pub per_address_wait: Duration,
    pub probe_timeout: Duration,
    pub broadcast_address: Ipv4Addr,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PJLINK_PORT,
            max_concurrent: 4,
            per_address_wait: Duration::from_millis(200),
            probe_timeout: Duration::from_secs(2),
            broadcast_address: Ipv4Addr::BROADCAST,
        }
    }
}

impl DiscoverySettings {
    pub fn normalized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.clamp(1, 16);
        self.per_address_wait = self
            .per_address_wait
            .clamp(Duration::from_millis(50), Duration::from_millis(5000));
        self
    }
}

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    DeviceDiscovered {
        discovery_id: String,
        result: DiscoveryResult,
    },
    Progress(DiscoveryStatus),
    Completed {
        discovery_id: String,
        results: Vec<DiscoveryResult>,
        success: bool,
    },
}

struct DiscoveryTask {
    status: DiscoveryStatus,
    started: Instant,
    results: Vec<DiscoveryResult>,
    cancel: Arc<AtomicBool>,
    last_reported: f32,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryTask {
    fn snapshot(&self) -> DiscoveryStatus {
        let mut status = self.status.clone();
        if !status.is_complete {
            status.elapsed_seconds = self.started.elapsed().as_secs_f64();
        }
        status
    }
}

struct Inner {
    settings: DiscoverySettings,
    tasks: Mutex<HashMap<String, DiscoveryTask>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

#[derive(Clone)]
pub struct DiscoveryManager {
    inner: Arc<Inner>,
}

impl Default for DiscoveryManager {
    fn default() -> Self {
        Self::new(DiscoverySettings::default())
    }
}

impl DiscoveryManager {
    pub fn new(settings: DiscoverySettings) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                settings: settings.normalized(),
                tasks: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.events.subscribe()
    }

    pub async fn start_broadcast(&self, wait: Duration) -> Result<String> {
        let socket = self.bind_broadcast_socket().await?;
        let target = SocketAddr::from((self.inner.settings.broadcast_address, self.inner.settings.port));
        let class_query = build_command(DeviceClass::Class1, Command::Clss, "?");

        for packet in [SEARCH_COMMAND, class_query.as_str()] {
            socket
                .send_to(packet.as_bytes(), target)
                .await
                .map_err(|e| PjlinkError::DiscoveryError {
                    message: format!("broadcast to {} failed: {}", target, e),
                })?;
        }

        let (id, cancel) = self.register(0);
        tracing::info!("Started broadcast discovery {} ({:.1}s)", id, wait.as_secs_f64());

        let manager = self.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            manager.run_broadcast(&task_id, socket, wait, cancel).await;
        });
        self.attach_handle(&id, handle);
        Ok(id)
    }

    pub async fn start_range_scan(&self, start: Ipv4Addr, end: Ipv4Addr, wait: Duration) -> Result<String> {
        let (first, last) = (u32::from(start), u32::from(end));
        if first == 0 || last == 0 {
            return Err(PjlinkError::DiscoveryError {
                message: "range addresses must not be 0.0.0.0".to_string(),
            });
        }
        if first > last {
            return Err(PjlinkError::DiscoveryError {
                message: format!("start address {} is after end address {}", start, end),
            });
        }
        self.start_scan(first, last, wait)
    }

    /// Scans every host address of the subnet (network and broadcast excluded).
    pub async fn start_subnet_scan(&self, subnet: Ipv4Addr, mask: Ipv4Addr, wait: Duration) -> Result<String> {
        if u32::from(subnet) == 0 {
            return Err(PjlinkError::DiscoveryError {
                message: "subnet address must not be 0.0.0.0".to_string(),
            });
        }
        validate_subnet_mask("subnet_mask", mask)?;

        let (first, last) = subnet_host_range(subnet, mask);
        self.start_scan(first, last, wait)
    }

    pub fn status(&self, discovery_id: &str) -> Option<DiscoveryStatus> {
        self.tasks().get(discovery_id).map(DiscoveryTask::snapshot)
    }

    pub fn all_statuses(&self) -> Vec<DiscoveryStatus> {
        self.tasks().values().map(DiscoveryTask::snapshot).collect()
    }

    pub fn results(&self, discovery_id: &str) -> Vec<DiscoveryResult> {
        self.tasks()
            .get(discovery_id)
            .map(|t| t.results.clone())
            .unwrap_or_default()
    }

    /// Returns false for an unknown id; an already finished run counts as cancelled.
    pub fn cancel(&self, discovery_id: &str) -> bool {
        {
            let mut tasks = self.tasks();
            let Some(task) = tasks.get_mut(discovery_id) else {
                return false;
            };
            if task.status.is_complete {
                return true;
            }
            task.cancel.store(true, Ordering::SeqCst);
            task.status.was_cancelled = true;
        }
        tracing::info!("Cancelled discovery {}", discovery_id);
        self.complete(discovery_id, false);
        true
    }

    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.tasks().keys().cloned().collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    /// Drops finished runs from the bookkeeping.
    pub fn clear_completed(&self) {
        self.tasks().retain(|_, t| !t.status.is_complete);
    }

    pub async fn wait_for_completion(&self, discovery_id: &str) -> Option<Vec<DiscoveryResult>> {
        let handle = self.tasks().get_mut(discovery_id)?.handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Discovery task {} ended abnormally: {}", discovery_id, e);
                self.complete(discovery_id, false);
            }
        }
        Some(self.results(discovery_id))
    }

    pub fn to_projector_info(result: &DiscoveryResult) -> ProjectorInfo {
        let name = if result.name.is_empty() {
            format!("Projector_{}", result.ip_address)
        } else {
            result.name.clone()
        };
        ProjectorInfo {
            name,
            ip_address: result.ip_address.clone(),
            port: result.port,
            device_class: result.device_class,
            requires_authentication: result.requires_authentication,
            product_name: result.model_name.clone(),
            ..Default::default()
        }
    }

    pub fn save_result_as_preset<S: Storage>(
        presets: &mut PresetManager<S>,
        result: &DiscoveryResult,
        preset_name: &str,
    ) -> Result<()> {
        presets.save_preset(preset_name, Self::to_projector_info(result))
    }

    /// Adds every device found by a run to `group_name`, creating the group if needed.
    pub fn save_results_as_group<P: ProjectorControl>(
        &self,
        manager: &ProjectorManager<P>,
        discovery_id: &str,
        group_name: &str,
    ) -> usize {
        let results = self.results(discovery_id);
        if results.is_empty() {
            return 0;
        }
        if !manager.group_exists(group_name) {
            manager.create_group(group_name);
        }
        for result in &results {
            manager.add_projector(Self::to_projector_info(result), Some(group_name));
        }
        tracing::info!("Added {} discovered projectors to group {}", results.len(), group_name);
        results.len()
    }

    fn start_scan(&self, first: u32, last: u32, wait: Duration) -> Result<String> {
        let total = last - first + 1;
        if total > MAX_SCAN_ADDRESSES {
            return Err(PjlinkError::DiscoveryError {
                message: format!("{} addresses exceed the scan limit of {}", total, MAX_SCAN_ADDRESSES),
            });
        }

        let (id, cancel) = self.register(total);
        tracing::info!(
            "Started scan {} of {} addresses ({} - {})",
            id,
            total,
            Ipv4Addr::from(first),
            Ipv4Addr::from(last)
        );

        let manager = self.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            manager.run_scan(&task_id, first, last, wait, cancel).await;
        });
        self.attach_handle(&id, handle);
        Ok(id)
    }

    async fn bind_broadcast_socket(&self) -> Result<UdpSocket> {
        let mut last_error = None;
        for attempt in 1..=BROADCAST_SETUP_RETRIES {
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
                Ok(socket) => match socket.set_broadcast(true) {
                    Ok(()) => return Ok(socket),
                    Err(e) => last_error = Some(e),
                },
                Err(e) => last_error = Some(e),
            }
            tracing::warn!("Broadcast socket setup failed (attempt {})", attempt);
            tokio::time::sleep(BROADCAST_RETRY_DELAY).await;
        }
        Err(PjlinkError::DiscoveryError {
            message: format!(
                "could not create broadcast socket: {}",
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    async fn run_broadcast(&self, id: &str, socket: UdpSocket, wait: Duration, cancel: Arc<AtomicBool>) {
        let started = Instant::now();
        let deadline = started + wait;
        let mut buf = [0u8; 512];

        while !cancel.load(Ordering::SeqCst) && Instant::now() < deadline {
            let slice = CANCEL_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()));
            let Ok(received) = timeout(slice, socket.recv_from(&mut buf)).await else {
                continue;
            };
            let (len, from) = match received {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!("Broadcast receive error: {}", e);
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            let ip = match from {
                SocketAddr::V4(v4) => *v4.ip(),
                SocketAddr::V6(_) => continue,
            };
            if let Some(mut result) = parse_broadcast_reply(&text, ip, self.inner.settings.port) {
                result.response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.record_result(id, result);
            }
        }

        self.complete(id, true);
    }

    async fn run_scan(&self, id: &str, first: u32, last: u32, wait: Duration, cancel: Arc<AtomicBool>) {
        let settings = self.inner.settings.clone();
        let deadline = Instant::now() + wait;
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent));
        let mut probes = JoinSet::new();

        for raw in first..=last {
            if cancel.load(Ordering::SeqCst) || Instant::now() >= deadline {
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let manager = self.clone();
            let task_id = id.to_string();
            let probe_timeout = settings.probe_timeout.min(wait);
            let port = settings.port;
            probes.spawn(async move {
                let _permit = permit;
                let result = probe_address(Ipv4Addr::from(raw), port, probe_timeout).await;
                manager.address_scanned(&task_id, result);
            });

            if raw != last {
                tokio::time::sleep(settings.per_address_wait).await;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let drained = timeout(remaining, async {
            while probes.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::info!("Discovery {} timed out", id);
        }
        probes.abort_all();

        self.complete(id, true);
    }

    fn register(&self, total_addresses: u32) -> (String, Arc<AtomicBool>) {
        let id = uuid::Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        self.tasks().insert(
            id.clone(),
            DiscoveryTask {
                status: DiscoveryStatus::new(id.clone(), total_addresses),
                started: Instant::now(),
                results: Vec::new(),
                cancel: Arc::clone(&cancel),
                last_reported: 0.0,
                handle: None,
            },
        );
        (id, cancel)
    }

    fn attach_handle(&self, id: &str, handle: JoinHandle<()>) {
        if let Some(task) = self.tasks().get_mut(id) {
            task.handle = Some(handle);
        }
    }

    fn address_scanned(&self, id: &str, result: Option<DiscoveryResult>) {
        if let Some(result) = result {
            self.record_result(id, result);
        }

        let progress = {
            let mut tasks = self.tasks();
            let Some(task) = tasks.get_mut(id) else {
                return;
            };
            if task.status.is_complete {
                return;
            }
            task.status.scanned_addresses += 1;
            task.status.update_percentage();
            let percentage = task.status.percentage;
            if percentage - task.last_reported >= PROGRESS_STEP || percentage >= 100.0 {
                task.last_reported = percentage;
                Some(task.snapshot())
            } else {
                None
            }
        };

        if let Some(status) = progress {
            self.emit(DiscoveryEvent::Progress(status));
        }
    }

    /// Stores a device once per IP address.
    fn record_result(&self, id: &str, result: DiscoveryResult) {
        {
            let mut tasks = self.tasks();
            let Some(task) = tasks.get_mut(id) else {
                return;
            };
            if task.status.is_complete
                || task.results.iter().any(|r| r.ip_address == result.ip_address)
            {
                return;
            }
            task.results.push(result.clone());
            task.status.discovered_devices += 1;
        }

        tracing::info!(
            "Discovered projector at {} ({}{})",
            result.ip_address,
            result.device_class,
            if result.requires_authentication { ", password protected" } else { "" }
        );
        self.emit(DiscoveryEvent::DeviceDiscovered {
            discovery_id: id.to_string(),
            result,
        });
    }

    /// Marks a run complete; only the first call has an effect.
    fn complete(&self, id: &str, success: bool) {
        let finished = {
            let mut tasks = self.tasks();
            let Some(task) = tasks.get_mut(id) else {
                return;
            };
            if task.status.is_complete {
                return;
            }
            task.status.elapsed_seconds = task.started.elapsed().as_secs_f64();
            task.status.is_complete = true;
            task.status.percentage = 100.0;
            (task.status.clone(), task.results.clone())
        };

        let (status, results) = finished;
        tracing::info!(
            "Discovery {} finished: {} devices in {:.1}s",
            id,
            results.len(),
            status.elapsed_seconds
        );
        self.emit(DiscoveryEvent::Progress(status));
        self.emit(DiscoveryEvent::Completed {
            discovery_id: id.to_string(),
            results,
            success,
        });
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, DiscoveryTask>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DiscoveryEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// First and last host address of a subnet, as integers.
pub fn subnet_host_range(subnet: Ipv4Addr, mask: Ipv4Addr) -> (u32, u32) {
    let mask = u32::from(mask);
    let network = u32::from(subnet) & mask;
    let broadcast = network | !mask;
    (network + 1, broadcast - 1)
}

/// Interprets a UDP reply to `SRCH` or `CLSS ?`.
pub fn parse_broadcast_reply(text: &str, ip: Ipv4Addr, port: u16) -> Option<DiscoveryResult> {
    let text = text.trim_matches(['\r', '\n', '\0']);
    if !text.starts_with('%') || text.len() < 7 {
        return None;
    }

    let mut result = DiscoveryResult::new(ip.to_string(), port);
    if protocol::parse_search_ack(text).is_some() {
        result.device_class = DeviceClass::Class2;
        return Some(result);
    }

    let response = parse_response(text).ok()?;
    if response.command != Command::Clss {
        return None;
    }
    result.device_class = protocol::parse_class(&response.parameter).unwrap_or_default();
    Some(result)
}

async fn probe_address(ip: Ipv4Addr, port: u16, wait: Duration) -> Option<DiscoveryResult> {
    let started = Instant::now();
    let stream = timeout(wait, TcpStream::connect((ip, port))).await.ok()?.ok()?;
    let mut stream = BufReader::new(stream);

    let greeting = read_probe_line(&mut stream, wait).await?;
    let greeting = Greeting::parse(&greeting).ok()?;

    let mut result = DiscoveryResult::new(ip.to_string(), port);
    result.response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    match greeting {
        Greeting::Authentication { .. } | Greeting::Rejected => {
            result.requires_authentication = true;
        }
        Greeting::NoAuthentication => {
            if let Some(class) = probe_query(&mut stream, Command::Clss, wait).await {
                result.device_class = protocol::parse_class(&class).unwrap_or_default();
            }
            if let Some(name) = probe_query(&mut stream, Command::Name, wait).await {
                result.name = name;
            }
            if let Some(model) = probe_query(&mut stream, Command::Inf2, wait).await {
                result.model_name = model;
            }
        }
    }
    Some(result)
}

async fn probe_query(stream: &mut BufReader<TcpStream>, command: Command, wait: Duration) -> Option<String> {
    let line = build_command(DeviceClass::Class1, command, "?");
    timeout(wait, stream.get_mut().write_all(line.as_bytes()))
        .await
        .ok()?
        .ok()?;
    let reply = read_probe_line(stream, wait).await?;
    let response = parse_response(&reply).ok()?;
    (response.command == command && response.is_success()).then_some(response.parameter)
}

async fn read_probe_line(stream: &mut BufReader<TcpStream>, wait: Duration) -> Option<String> {
    let mut buf = Vec::new();
    let read = timeout(wait, stream.read_until(protocol::TERMINATOR, &mut buf))
        .await
        .ok()?
        .ok()?;
    if read == 0 || buf.len() > protocol::MAX_LINE_LENGTH {
        return None;
    }
    Some(String::from_utf8_lossy(&buf).trim_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_host_range() {
        let (first, last) = subnet_host_range(
            Ipv4Addr::new(192, 168, 1, 77),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        assert_eq!(Ipv4Addr::from(first), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(Ipv4Addr::from(last), Ipv4Addr::new(192, 168, 1, 254));
        assert_eq!(last - first + 1, 254);
    }

    #[test]
    fn test_settings_are_clamped() {
        let settings = DiscoverySettings {
            max_concurrent: 64,
            per_address_wait: Duration::from_millis(1),
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.max_concurrent, 16);
        assert_eq!(settings.per_address_wait, Duration::from_millis(50));
    }

    #[test]
    fn test_parse_broadcast_reply() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let ack = parse_broadcast_reply("%2ACKN=00:11:22:33:44:55\r", ip, 4352).unwrap();
        assert_eq!(ack.device_class, DeviceClass::Class2);
        assert_eq!(ack.ip_address, "10.0.0.5");

        let class = parse_broadcast_reply("%1CLSS=1\r", ip, 4352).unwrap();
        assert_eq!(class.device_class, DeviceClass::Class1);

        assert!(parse_broadcast_reply("%1POWR=1", ip, 4352).is_none());
        assert!(parse_broadcast_reply("hello", ip, 4352).is_none());
        assert!(parse_broadcast_reply("%1CL", ip, 4352).is_none());
    }

    #[test]
    fn test_to_projector_info_defaults_name() {
        let mut result = DiscoveryResult::new("10.0.0.9", 4352);
        result.model_name = "EB-L1500U".to_string();
        let info = DiscoveryManager::to_projector_info(&result);
        assert_eq!(info.name, "Projector_10.0.0.9");
        assert_eq!(info.product_name, "EB-L1500U");
    }

    #[tokio::test]
    async fn test_invalid_ranges_are_rejected() {
        let manager = DiscoveryManager::default();
        assert!(manager
            .start_range_scan(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 1), DEFAULT_RANGE_TIMEOUT)
            .await
            .is_err());
        assert!(manager
            .start_range_scan(Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(10, 0, 0, 1), DEFAULT_RANGE_TIMEOUT)
            .await
            .is_err());
        assert!(manager
            .start_subnet_scan(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 255, 255, 255), DEFAULT_SUBNET_TIMEOUT)
            .await
            .is_err());
        assert!(manager.all_statuses().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_semantics() {
        let manager = DiscoveryManager::default();
        assert!(!manager.cancel("missing"));

        // Nothing listens on port 9 of the documentation range; the scan just runs.
        let id = manager
            .start_range_scan(
                Ipv4Addr::new(192, 0, 2, 1),
                Ipv4Addr::new(192, 0, 2, 200),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        let mut events = manager.subscribe();

        assert!(manager.cancel(&id));
        let status = manager.status(&id).unwrap();
        assert!(status.is_complete);
        assert!(status.was_cancelled);
        assert_eq!(status.percentage, 100.0);
        assert!(manager.cancel(&id));

        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DiscoveryEvent::Completed { success: false, .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);

        assert!(manager.wait_for_completion(&id).await.is_some());
        manager.clear_completed();
        assert!(manager.status(&id).is_none());
    }
}
