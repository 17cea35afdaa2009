//! Process control through `supervisorctl`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use vigil_core::{Component, ProcessControl, Program, ProgramStatus};

use crate::config::{Config, ProgramNames};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramState {
    pub status: ProgramStatus,
    pub pid: Option<u32>,
}

/// Parse `supervisorctl status <program>` output, e.g.
/// `worker  RUNNING   pid 4242, uptime 1 day, 2:03:04`.
pub fn parse_status(program: &str, output: &str) -> ProgramState {
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some(program) {
            continue;
        }

        let status = fields
            .next()
            .map(ProgramStatus::parse)
            .unwrap_or(ProgramStatus::Unknown);
        let rest: Vec<&str> = fields.collect();
        let pid = rest
            .windows(2)
            .find(|pair| pair[0] == "pid")
            .and_then(|pair| pair[1].trim_end_matches(',').parse().ok());

        return ProgramState { status, pid };
    }

    ProgramState {
        status: ProgramStatus::Unknown,
        pid: None,
    }
}

pub struct SupervisorControl {
    supervisorctl: String,
    programs: ProgramNames,
    reboot_command: Vec<String>,
    reboot_enabled: bool,
}

impl SupervisorControl {
    pub fn new(config: &Config) -> Self {
        Self {
            supervisorctl: config.supervisorctl.clone(),
            programs: config.programs.clone(),
            reboot_command: config.reboot_command.clone(),
            reboot_enabled: config.reboot_enabled,
        }
    }

    async fn state(&self, component: Component) -> Result<ProgramState> {
        let program = self.programs.name(component.into());

        // Exit status is non-zero for anything but RUNNING, so only stdout matters here.
        let output = Command::new(&self.supervisorctl)
            .args(["status", program])
            .output()
            .await
            .with_context(|| format!("Failed to run {} status {}", self.supervisorctl, program))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let state = parse_status(program, &stdout);
        debug!("{} is {:?} (pid {:?})", program, state.status, state.pid);
        Ok(state)
    }

    async fn control(&self, verb: &str, program: Program) -> Result<()> {
        let name = self.programs.name(program);
        let output = Command::new(&self.supervisorctl)
            .args([verb, name])
            .output()
            .await
            .with_context(|| format!("Failed to run {} {} {}", self.supervisorctl, verb, name))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            anyhow::bail!("supervisorctl {} {} failed: {}{}", verb, name, stdout.trim(), stderr.trim());
        }

        Ok(())
    }
}

#[async_trait]
impl ProcessControl for SupervisorControl {
    async fn status(&self, component: Component) -> Result<ProgramStatus> {
        Ok(self.state(component).await?.status)
    }

    async fn pid(&self, component: Component) -> Result<Option<u32>> {
        Ok(self.state(component).await?.pid)
    }

    async fn start(&self, program: Program) -> Result<()> {
        self.control("start", program).await
    }

    async fn restart(&self, program: Program) -> Result<()> {
        self.control("restart", program).await
    }

    async fn reboot(&self) -> Result<()> {
        if !self.reboot_enabled {
            info!("Reboot was requested but is disabled");
            return Ok(());
        }

        let Some((program, args)) = self.reboot_command.split_first() else {
            anyhow::bail!("Reboot command is empty");
        };

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.reboot_command.join(" ")))?;

        if !status.success() {
            anyhow::bail!("{} exited with {}", self.reboot_command.join(" "), status);
        }

        Ok(())
    }
}
