//! Collaborators the watchdog drives. The daemon provides the real
//! implementations; tests use the in-memory fakes in `testing`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Tunables;
use crate::types::{Component, Program, ProgramStatus, WorkerStatus};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Persistent agent settings and per-component timestamps.
pub trait SettingsStore: Send + Sync {
    fn tunables(&self) -> Result<Tunables>;
    fn is_activated(&self) -> Result<bool>;
    fn is_worker_stopped(&self) -> Result<bool>;
    fn started_at(&self, component: Component) -> Result<Option<DateTime<Utc>>>;
    fn restarted_at(&self, component: Component) -> Result<Option<DateTime<Utc>>>;
    fn set_restarted_at(&self, component: Component, at: DateTime<Utc>) -> Result<()>;
    fn rebooted_at(&self) -> Result<Option<DateTime<Utc>>>;
    fn set_rebooted_at(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Failure of an HTTP collaborator. Resolvers treat connection loss and
/// protocol errors differently, so they are kept apart.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// `None` means the coordinator could not tell.
    async fn is_agent_online(&self) -> Result<Option<bool>>;
}

#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn get_status(&self) -> Result<WorkerStatus, ClientError>;
}

#[async_trait]
pub trait ConsoleClient: Send + Sync {
    /// Plain GET against the console base URL, returning the status code.
    async fn probe(&self) -> Result<u16, ClientError>;
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn status(&self, component: Component) -> Result<ProgramStatus>;
    async fn pid(&self, component: Component) -> Result<Option<u32>>;
    async fn start(&self, program: Program) -> Result<()>;
    async fn restart(&self, program: Program) -> Result<()>;
    async fn reboot(&self) -> Result<()>;
}

/// Host-level facts: process liveness, load diagnostics, free disk space.
pub trait Host: Send + Sync {
    fn process_exists(&self, pid: u32) -> bool;
    fn load_average(&self) -> [f64; 3];
    fn cpu_percent(&self) -> f32;
    fn cpu_count(&self) -> usize;
    fn available_disk_space(&self) -> Result<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Error,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        }
    }
}

/// External error-tracking sink.
pub trait Alerts: Send + Sync {
    fn capture_message(&self, level: AlertLevel, message: &str);
    fn capture_error(&self, context: &str, error: &anyhow::Error);
}
