use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use vigil_core::{Component, Program};

#[derive(Clone)]
pub struct Config {
    pub agent_id: String,
    pub server_url: Option<String>,
    pub access_token: Option<String>,
    pub worker_status_url: String,
    pub console_url: String,
    pub http_timeout_secs: u64,
    pub tunables_path: PathBuf,
    pub state_path: PathBuf,
    pub disk_path: PathBuf,
    pub supervisorctl: String,
    pub programs: ProgramNames,
    pub reboot_command: Vec<String>,
    pub reboot_enabled: bool,
    pub alert_webhook_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("agent_id", &self.agent_id)
            .field("server_url", &self.server_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("worker_status_url", &self.worker_status_url)
            .field("console_url", &self.console_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("tunables_path", &self.tunables_path)
            .field("state_path", &self.state_path)
            .field("disk_path", &self.disk_path)
            .field("supervisorctl", &self.supervisorctl)
            .field("programs", &self.programs)
            .field("reboot_command", &self.reboot_command)
            .field("reboot_enabled", &self.reboot_enabled)
            .field("alert_webhook_url", &self.alert_webhook_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Supervisor program names of the managed processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramNames {
    pub worker: String,
    pub console: String,
    pub watchdog: String,
    pub proxy: String,
}

impl Default for ProgramNames {
    fn default() -> Self {
        Self {
            worker: "worker".to_string(),
            console: "console".to_string(),
            watchdog: "watchdog".to_string(),
            proxy: "nginx".to_string(),
        }
    }
}

impl ProgramNames {
    pub fn name(&self, program: Program) -> &str {
        match program {
            Program::Component(Component::Worker) => &self.worker,
            Program::Component(Component::Console) => &self.console,
            Program::Component(Component::Watchdog) => &self.watchdog,
            Program::Proxy => &self.proxy,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let http_timeout_secs = match std::env::var("VIGIL_HTTP_TIMEOUT") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("VIGIL_HTTP_TIMEOUT must be a number of seconds, got {:?}", v))?,
            Err(_) => 10,
        };

        let reboot_command: Vec<String> = std::env::var("VIGIL_REBOOT_COMMAND")
            .unwrap_or_else(|_| "reboot now".to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if reboot_command.is_empty() {
            anyhow::bail!("VIGIL_REBOOT_COMMAND must not be empty");
        }

        let defaults = ProgramNames::default();
        let programs = ProgramNames {
            worker: std::env::var("VIGIL_WORKER_PROGRAM").unwrap_or(defaults.worker),
            console: std::env::var("VIGIL_CONSOLE_PROGRAM").unwrap_or(defaults.console),
            watchdog: std::env::var("VIGIL_WATCHDOG_PROGRAM").unwrap_or(defaults.watchdog),
            proxy: std::env::var("VIGIL_PROXY_PROGRAM").unwrap_or(defaults.proxy),
        };

        Ok(Self {
            agent_id: std::env::var("VIGIL_AGENT_ID").unwrap_or_else(|_| {
                std::env::var("HOSTNAME").unwrap_or_else(|_| "agent".to_string())
            }),

            server_url: std::env::var("VIGIL_SERVER_URL").ok(),
            access_token: std::env::var("VIGIL_ACCESS_TOKEN").ok(),

            worker_status_url: std::env::var("VIGIL_WORKER_STATUS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8001/status".to_string()),

            console_url: std::env::var("VIGIL_CONSOLE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/".to_string()),

            http_timeout_secs,

            tunables_path: std::env::var("VIGIL_TUNABLES_PATH")
                .unwrap_or_else(|_| "/etc/vigil/tunables.toml".to_string())
                .into(),

            state_path: std::env::var("VIGIL_STATE_PATH")
                .unwrap_or_else(|_| "/var/lib/vigil/state.json".to_string())
                .into(),

            disk_path: std::env::var("VIGIL_DISK_PATH")
                .unwrap_or_else(|_| "/".to_string())
                .into(),

            supervisorctl: std::env::var("VIGIL_SUPERVISORCTL")
                .unwrap_or_else(|_| "supervisorctl".to_string()),

            programs,
            reboot_command,

            reboot_enabled: std::env::var("VIGIL_REBOOT_ENABLED")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(true),

            alert_webhook_url: std::env::var("VIGIL_ALERT_WEBHOOK_URL").ok(),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
