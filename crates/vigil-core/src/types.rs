use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix that marks a worker loop as a measurement loop.
pub const MEASUREMENT_LOOP_SUFFIX: &str = "_module_loop";

/// A locally managed process supervised by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Worker,
    Console,
    Watchdog,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Worker => "worker",
            Component::Console => "console",
            Component::Watchdog => "watchdog",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Component::Worker => "Worker",
            Component::Console => "Console",
            Component::Watchdog => "Watchdog",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the process control collaborator can start or restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Component(Component),
    /// Reverse proxy in front of the console.
    Proxy,
}

impl From<Component> for Program {
    fn from(component: Component) -> Self {
        Program::Component(component)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Program::Component(c) => c.fmt(f),
            Program::Proxy => f.write_str("proxy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemedialAction {
    None,
    Start,
    Restart,
    Reboot,
}

impl RemedialAction {
    pub fn is_none(&self) -> bool {
        matches!(self, RemedialAction::None)
    }
}

impl fmt::Display for RemedialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemedialAction::None => "none",
            RemedialAction::Start => "start",
            RemedialAction::Restart => "restart",
            RemedialAction::Reboot => "reboot",
        })
    }
}

/// State of a program as reported by the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Exited,
    Backoff,
    Fatal,
    Unknown,
}

impl ProgramStatus {
    pub fn parse(state: &str) -> Self {
        match state {
            "STARTING" => ProgramStatus::Starting,
            "RUNNING" => ProgramStatus::Running,
            "STOPPING" => ProgramStatus::Stopping,
            "STOPPED" => ProgramStatus::Stopped,
            "EXITED" => ProgramStatus::Exited,
            "BACKOFF" => ProgramStatus::Backoff,
            "FATAL" => ProgramStatus::Fatal,
            _ => ProgramStatus::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == ProgramStatus::Running
    }

    /// Starting or stopping; the supervisor is already acting on it.
    pub fn is_transitional(&self) -> bool {
        matches!(self, ProgramStatus::Starting | ProgramStatus::Stopping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    Scheduled,
    ScheduledProducer,
    Periodic,
    #[serde(other)]
    Other,
}

/// One named loop as self-reported by the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopProps {
    #[serde(default)]
    pub counter: Value,
    #[serde(default)]
    pub loop_type: Option<LoopType>,
    #[serde(default)]
    pub schedule: Option<String>,
    /// Seconds between iterations of a periodic loop.
    #[serde(default)]
    pub period: Option<f64>,
}

/// Body of the worker's HTTP status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(default)]
    pub loops: HashMap<String, LoopProps>,
    #[serde(default)]
    pub collected_counter: Value,
    #[serde(default)]
    pub submitted_counter: Value,
    #[serde(default)]
    pub purged_records: Value,
}

impl WorkerStatus {
    pub fn measurement_loops(&self) -> impl Iterator<Item = (&String, &LoopProps)> {
        self.loops
            .iter()
            .filter(|(name, _)| name.ends_with(MEASUREMENT_LOOP_SUFFIX))
    }
}
