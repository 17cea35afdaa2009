//! Resolvers that decide what, if anything, to do about the worker.
//!
//! They run in a fixed priority order and the first one proposing an
//! action wins: online status, supervisor status, process existence,
//! HTTP status, then the daily preventive restart.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::seconds;
use crate::ports::ClientError;
use crate::service::{Watchdog, DAY_SECONDS};
use crate::types::{Component, RemedialAction};

impl Watchdog {
    pub(crate) async fn worker_action(&mut self) -> Result<RemedialAction> {
        if !self.deps.settings.is_activated()? {
            if !self.reported_not_activated {
                self.reported_not_activated = true;
                info!("Worker is not activated");
            }
            return Ok(RemedialAction::None);
        }
        self.reported_not_activated = false;

        if self.deps.settings.is_worker_stopped()? {
            if !self.reported_stopped {
                self.reported_stopped = true;
                info!("Worker is stopped on purpose");
            }
            return Ok(RemedialAction::None);
        }
        self.reported_stopped = false;

        let action = self.resolve_online_status().await?;
        if !action.is_none() {
            return Ok(action);
        }
        let action = self.resolve_supervisor_status().await?;
        if !action.is_none() {
            return Ok(action);
        }
        let action = self.resolve_process_status().await?;
        if !action.is_none() {
            return Ok(action);
        }
        let action = self.resolve_worker_response().await?;
        if !action.is_none() {
            return Ok(action);
        }

        if self.is_uptime_gte(Component::Worker, seconds(DAY_SECONDS))? {
            return Ok(RemedialAction::Restart);
        }
        Ok(RemedialAction::None)
    }

    /// Escalates to a restart or a reboot when the coordinator has not seen
    /// the agent online for long enough, and the last action of that kind
    /// is not too recent.
    pub(crate) async fn resolve_online_status(&mut self) -> Result<RemedialAction> {
        debug!("Resolving agent online status...");
        let now = self.now();

        if !self.tunables.heartbeat_enabled {
            debug!("Heartbeat is disabled, so we do not expect agent to be online");
            return Ok(RemedialAction::None);
        }

        let is_online = match self.deps.coordinator.is_agent_online().await {
            Ok(Some(is_online)) => is_online,
            Ok(None) => {
                debug!("Coordinator could not tell whether the agent is online");
                return Ok(RemedialAction::None);
            }
            Err(e) => {
                debug!("Could not get agent online status: {:#}", e);
                return Ok(RemedialAction::None);
            }
        };

        if is_online {
            self.last_known_online_at = Some(now);
        }
        let Some(last_online) = self.last_known_online_at else {
            return Ok(RemedialAction::None);
        };

        let offline = now.signed_duration_since(last_online);
        let settings = &self.deps.settings;

        let rebooted_at = settings.rebooted_at()?.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if offline >= self.tunables.offline_to_reboot()
            && now.signed_duration_since(rebooted_at) >= self.tunables.reboot_wait()
        {
            return Ok(RemedialAction::Reboot);
        }

        let last_started = settings
            .started_at(Component::Worker)?
            .max(settings.restarted_at(Component::Worker)?)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if offline >= self.tunables.offline_to_restart()
            && now.signed_duration_since(last_started) >= self.tunables.restart_wait()
        {
            return Ok(RemedialAction::Restart);
        }

        Ok(RemedialAction::None)
    }

    pub(crate) async fn resolve_supervisor_status(&mut self) -> Result<RemedialAction> {
        debug!("Resolving Worker running status (supervisor)...");
        let status = self.deps.control.status(Component::Worker).await?;

        if status.is_running() {
            debug!("Worker is running (supervisor)");
            return Ok(RemedialAction::None);
        }
        if status.is_transitional() {
            debug!("Worker is starting or stopping (supervisor)");
            return Ok(RemedialAction::None);
        }

        debug!("Worker is NOT running (supervisor)");
        Ok(RemedialAction::Start)
    }

    pub(crate) async fn resolve_process_status(&mut self) -> Result<RemedialAction> {
        let pid = self
            .deps
            .control
            .pid(Component::Worker)
            .await
            .context("Failed to get Worker pid")?;

        match pid {
            Some(pid) if !self.deps.host.process_exists(pid) => {
                debug!("Worker process {} does not exist", pid);
                Ok(RemedialAction::Restart)
            }
            Some(_) => Ok(RemedialAction::None),
            None => {
                debug!("Supervisor reported no Worker pid");
                Ok(RemedialAction::None)
            }
        }
    }

    /// Fetches the worker's own status. Connection loss means the worker is
    /// unhealthy; an HTTP error is reported for a human to look at.
    pub(crate) async fn resolve_worker_response(&mut self) -> Result<RemedialAction> {
        let started = self.now();
        let status = match self.deps.worker.get_status().await {
            Ok(status) => status,
            Err(ClientError::Connect(e)) => {
                debug!("Could not get Worker status over HTTP: {}", e);
                return Ok(RemedialAction::Restart);
            }
            Err(ClientError::Status { code, message }) => {
                self.report_error(&format!("Worker returned HTTP{}: {}", code, message));
                return Ok(RemedialAction::None);
            }
            Err(e) => return Err(e).context("Failed to get Worker status"),
        };
        let actual = self
            .now()
            .signed_duration_since(started)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let expected = self.tunables.expected_http_response();
        if actual > expected {
            self.report_with_perf_info(&format!(
                "It took {:.3} seconds for Worker to respond while it was expected to take only {:.3}",
                actual.as_secs_f64(),
                expected.as_secs_f64()
            ));
        }

        let now = self.now();
        let relax = self.tunables.relax_period();
        if status.loops.is_empty() {
            self.report_warning("Worker did not return running loops");
        } else {
            for stale in self.loops.observe(&status.loops, now, relax) {
                self.report_with_perf_info(&stale.to_string());
            }
        }

        let purge_period = self.tunables.purge_period();
        for stale in self.workflow.observe(&status, now, relax, purge_period) {
            self.report_with_perf_info(&stale.to_string());
        }

        Ok(RemedialAction::None)
    }
}
