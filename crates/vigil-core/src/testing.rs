//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::config::Tunables;
use crate::ports::{
    AlertLevel, Alerts, ClientError, Clock, ConsoleClient, Coordinator, Host, ProcessControl,
    SettingsStore, WorkerClient,
};
use crate::service::{Collaborators, Watchdog};
use crate::types::{Component, Program, ProgramStatus, WorkerStatus};

pub struct FakeClock(Mutex<DateTime<Utc>>);

impl FakeClock {
    pub fn advance(&self, by: TimeDelta) {
        *self.0.lock().unwrap() += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
struct SettingsState {
    tunables: Tunables,
    fail_tunables: bool,
    inactive: bool,
    worker_stopped: bool,
    started_at: HashMap<Component, DateTime<Utc>>,
    restarted_at: HashMap<Component, DateTime<Utc>>,
    rebooted_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemorySettings(Mutex<SettingsState>);

impl MemorySettings {
    pub fn update_tunables(&self, f: impl FnOnce(&mut Tunables)) {
        f(&mut self.0.lock().unwrap().tunables);
    }

    pub fn current_tunables(&self) -> Tunables {
        self.0.lock().unwrap().tunables.clone()
    }

    pub fn set_check_period(&self, secs: u64) {
        self.update_tunables(|t| t.check_period_seconds = secs);
    }

    pub fn fail_tunables(&self) {
        self.0.lock().unwrap().fail_tunables = true;
    }

    pub fn set_activated(&self, activated: bool) {
        self.0.lock().unwrap().inactive = !activated;
    }

    pub fn set_worker_stopped(&self, stopped: bool) {
        self.0.lock().unwrap().worker_stopped = stopped;
    }

    pub fn set_started(&self, component: Component, at: DateTime<Utc>) {
        self.0.lock().unwrap().started_at.insert(component, at);
    }

    pub fn set_restarted(&self, component: Component, at: DateTime<Utc>) {
        self.0.lock().unwrap().restarted_at.insert(component, at);
    }

    pub fn restarted(&self, component: Component) -> Option<DateTime<Utc>> {
        self.0.lock().unwrap().restarted_at.get(&component).copied()
    }

    pub fn set_rebooted(&self, at: DateTime<Utc>) {
        self.0.lock().unwrap().rebooted_at = Some(at);
    }

    pub fn rebooted(&self) -> Option<DateTime<Utc>> {
        self.0.lock().unwrap().rebooted_at
    }
}

impl SettingsStore for MemorySettings {
    fn tunables(&self) -> Result<Tunables> {
        let state = self.0.lock().unwrap();
        if state.fail_tunables {
            return Err(anyhow!("tunables file is corrupt"));
        }
        Ok(state.tunables.clone())
    }

    fn is_activated(&self) -> Result<bool> {
        Ok(!self.0.lock().unwrap().inactive)
    }

    fn is_worker_stopped(&self) -> Result<bool> {
        Ok(self.0.lock().unwrap().worker_stopped)
    }

    fn started_at(&self, component: Component) -> Result<Option<DateTime<Utc>>> {
        Ok(self.0.lock().unwrap().started_at.get(&component).copied())
    }

    fn restarted_at(&self, component: Component) -> Result<Option<DateTime<Utc>>> {
        Ok(self.restarted(component))
    }

    fn set_restarted_at(&self, component: Component, at: DateTime<Utc>) -> Result<()> {
        self.set_restarted(component, at);
        Ok(())
    }

    fn rebooted_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.rebooted())
    }

    fn set_rebooted_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_rebooted(at);
        Ok(())
    }
}

/// Replayable form of a [`ClientError`].
#[derive(Clone)]
enum Failure {
    Connect(String),
    Status(u16, String),
    Other(String),
}

impl Failure {
    fn capture(err: ClientError) -> Self {
        match err {
            ClientError::Connect(e) => Failure::Connect(e),
            ClientError::Status { code, message } => Failure::Status(code, message),
            ClientError::Other(e) => Failure::Other(e.to_string()),
        }
    }

    fn replay(&self) -> ClientError {
        match self {
            Failure::Connect(e) => ClientError::Connect(e.clone()),
            Failure::Status(code, message) => ClientError::Status {
                code: *code,
                message: message.clone(),
            },
            Failure::Other(e) => ClientError::Other(anyhow!(e.clone())),
        }
    }
}

pub struct FakeCoordinator(Mutex<Result<Option<bool>, String>>);

impl FakeCoordinator {
    pub fn set_online(&self, reply: Result<Option<bool>, String>) {
        *self.0.lock().unwrap() = reply;
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn is_agent_online(&self) -> Result<Option<bool>> {
        self.0.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

pub struct FakeWorker {
    reply: Mutex<Result<WorkerStatus, Failure>>,
    requests: AtomicUsize,
    clock: Arc<FakeClock>,
    latency: Mutex<TimeDelta>,
}

impl FakeWorker {
    pub fn set_status(&self, status: WorkerStatus) {
        *self.reply.lock().unwrap() = Ok(status);
    }

    pub fn set_response(&self, reply: Result<WorkerStatus, ClientError>) {
        *self.reply.lock().unwrap() = reply.map_err(Failure::capture);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every request moves the shared clock forward by `latency`.
    pub fn set_latency(&self, latency: TimeDelta) {
        *self.latency.lock().unwrap() = latency;
    }
}

#[async_trait]
impl WorkerClient for FakeWorker {
    async fn get_status(&self) -> Result<WorkerStatus, ClientError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.clock.advance(*self.latency.lock().unwrap());
        self.reply.lock().unwrap().clone().map_err(|f| f.replay())
    }
}

pub struct FakeConsole(Mutex<Result<u16, Failure>>);

impl FakeConsole {
    pub fn set_response(&self, reply: Result<u16, ClientError>) {
        *self.0.lock().unwrap() = reply.map_err(Failure::capture);
    }
}

#[async_trait]
impl ConsoleClient for FakeConsole {
    async fn probe(&self) -> Result<u16, ClientError> {
        self.0.lock().unwrap().clone().map_err(|f| f.replay())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Restart(String),
    Reboot,
}

pub struct FakeControl {
    status: Mutex<HashMap<Component, ProgramStatus>>,
    pids: Mutex<HashMap<Component, Option<u32>>>,
    calls: Mutex<Vec<Call>>,
    status_queries: AtomicUsize,
}

impl FakeControl {
    pub fn set_status(&self, component: Component, status: ProgramStatus) {
        self.status.lock().unwrap().insert(component, status);
    }

    pub fn set_pid(&self, component: Component, pid: Option<u32>) {
        self.pids.lock().unwrap().insert(component, pid);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn status(&self, component: Component) -> Result<ProgramStatus> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .status
            .lock()
            .unwrap()
            .get(&component)
            .copied()
            .unwrap_or(ProgramStatus::Running))
    }

    async fn pid(&self, component: Component) -> Result<Option<u32>> {
        Ok(self
            .pids
            .lock()
            .unwrap()
            .get(&component)
            .copied()
            .unwrap_or(Some(42)))
    }

    async fn start(&self, program: Program) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Start(program.to_string()));
        Ok(())
    }

    async fn restart(&self, program: Program) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Restart(program.to_string()));
        Ok(())
    }

    async fn reboot(&self) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Reboot);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Disk {
    Free(u64),
    Fail,
    Panic,
}

pub struct FakeHost {
    dead: Mutex<HashSet<u32>>,
    disk: Mutex<Disk>,
}

impl FakeHost {
    pub fn kill(&self, pid: u32) {
        self.dead.lock().unwrap().insert(pid);
    }

    pub fn set_disk_space(&self, bytes: u64) {
        *self.disk.lock().unwrap() = Disk::Free(bytes);
    }

    pub fn fail_disk(&self) {
        *self.disk.lock().unwrap() = Disk::Fail;
    }

    pub fn panic_on_disk(&self) {
        *self.disk.lock().unwrap() = Disk::Panic;
    }
}

impl Host for FakeHost {
    fn process_exists(&self, pid: u32) -> bool {
        !self.dead.lock().unwrap().contains(&pid)
    }

    fn load_average(&self) -> [f64; 3] {
        [0.5, 0.4, 0.3]
    }

    fn cpu_percent(&self) -> f32 {
        12.5
    }

    fn cpu_count(&self) -> usize {
        4
    }

    fn available_disk_space(&self) -> Result<u64> {
        let disk = *self.disk.lock().unwrap();
        match disk {
            Disk::Free(bytes) => Ok(bytes),
            Disk::Fail => Err(anyhow!("statvfs failed")),
            Disk::Panic => panic!("disk probe exploded"),
        }
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    messages: Mutex<Vec<(AlertLevel, String)>>,
    failures: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    fn messages_at(&self, level: AlertLevel) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages_at(AlertLevel::Warning)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.messages_at(AlertLevel::Error)
    }

    /// Contexts passed to `capture_error`.
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl Alerts for RecordingAlerts {
    fn capture_message(&self, level: AlertLevel, message: &str) {
        self.messages.lock().unwrap().push((level, message.to_string()));
    }

    fn capture_error(&self, context: &str, _error: &anyhow::Error) {
        self.failures.lock().unwrap().push(context.to_string());
    }
}

pub struct Harness {
    pub clock: Arc<FakeClock>,
    pub settings: Arc<MemorySettings>,
    pub coordinator: Arc<FakeCoordinator>,
    pub worker: Arc<FakeWorker>,
    pub console: Arc<FakeConsole>,
    pub control: Arc<FakeControl>,
    pub host: Arc<FakeHost>,
    pub alerts: Arc<RecordingAlerts>,
}

/// A healthy agent: activated, worker running with a live pid, console
/// answering 200, plenty of disk, coordinator undecided.
pub fn harness() -> Harness {
    let clock = Arc::new(FakeClock(Mutex::new(
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    )));
    Harness {
        clock: clock.clone(),
        settings: Arc::new(MemorySettings::default()),
        coordinator: Arc::new(FakeCoordinator(Mutex::new(Ok(None)))),
        worker: Arc::new(FakeWorker {
            reply: Mutex::new(Ok(WorkerStatus::default())),
            requests: AtomicUsize::new(0),
            clock,
            latency: Mutex::new(TimeDelta::zero()),
        }),
        console: Arc::new(FakeConsole(Mutex::new(Ok(200)))),
        control: Arc::new(FakeControl {
            status: Mutex::new(HashMap::new()),
            pids: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            status_queries: AtomicUsize::new(0),
        }),
        host: Arc::new(FakeHost {
            dead: Mutex::new(HashSet::new()),
            disk: Mutex::new(Disk::Free(u64::MAX)),
        }),
        alerts: Arc::new(RecordingAlerts::default()),
    }
}

impl Harness {
    /// Marks the watchdog as started an hour ago, past its warmup.
    pub fn warmed_up(self) -> Self {
        let started = self.clock.now() - TimeDelta::hours(1);
        self.settings.set_started(Component::Watchdog, started);
        self
    }

    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(Collaborators {
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            coordinator: self.coordinator.clone(),
            worker: self.worker.clone(),
            console: self.console.clone(),
            control: self.control.clone(),
            host: self.host.clone(),
            alerts: self.alerts.clone(),
        })
    }
}
