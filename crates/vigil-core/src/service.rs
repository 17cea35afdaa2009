//! The watchdog control loop.
//!
//! Every tick runs the general, worker, console and watchdog handlers in
//! that order. A failing handler is logged and reported but never stops the
//! remaining handlers or the loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::{LoopTracker, WorkflowTracker};
use crate::config::{seconds, Tunables, FAILOVER_CHECK_PERIOD};
use crate::ports::{
    AlertLevel, Alerts, ClientError, Clock, ConsoleClient, Coordinator, Host, ProcessControl,
    SettingsStore, WorkerClient,
};
use crate::throttle::Throttle;
use crate::types::{Component, RemedialAction};

/// Uptime after which a component is restarted preventively.
pub const DAY_SECONDS: u64 = 24 * 60 * 60;

/// Everything the watchdog talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<dyn SettingsStore>,
    pub coordinator: Arc<dyn Coordinator>,
    pub worker: Arc<dyn WorkerClient>,
    pub console: Arc<dyn ConsoleClient>,
    pub control: Arc<dyn ProcessControl>,
    pub host: Arc<dyn Host>,
    pub alerts: Arc<dyn Alerts>,
}

/// Asks a running [`Watchdog`] to stop after the current tick.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn graceful_stop(&self) {
        self.tx.send_replace(true);
    }
}

pub struct Watchdog {
    pub(crate) deps: Collaborators,
    pub(crate) tunables: Tunables,
    pub(crate) throttle: Throttle,
    pub(crate) loops: LoopTracker,
    pub(crate) workflow: WorkflowTracker,
    pub(crate) last_known_online_at: Option<DateTime<Utc>>,
    pub(crate) reported_not_activated: bool,
    pub(crate) reported_stopped: bool,
    created_at: DateTime<Utc>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Watchdog {
    pub fn new(deps: Collaborators) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let created_at = deps.clock.now();
        Self {
            deps,
            tunables: Tunables::default(),
            throttle: Throttle::new(),
            loops: LoopTracker::new(),
            workflow: WorkflowTracker::new(),
            last_known_online_at: None,
            reported_not_activated: false,
            reported_stopped: false,
            created_at,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn graceful_stop(&self) {
        self.stop_handle().graceful_stop();
    }

    /// Runs until [`StopHandle::graceful_stop`] is called. A stop request
    /// interrupts the inter-tick sleep but never a tick in progress.
    pub async fn run(&mut self) {
        info!("Watchdog started");
        let mut stop_rx = self.stop_rx.clone();

        while !*stop_rx.borrow_and_update() {
            let started = Instant::now();

            let outcome = AssertUnwindSafe(self.tick()).catch_unwind().await;
            if let Err(panic) = outcome {
                let err = anyhow::anyhow!("panicked: {}", panic_message(&*panic));
                self.capture_failure("Error during loop iteration", &err);
            }

            let remaining = self.check_period().saturating_sub(started.elapsed());
            if remaining.is_zero() {
                continue;
            }

            debug!("Waiting for {:.3} seconds for next iteration", remaining.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = stop_rx.changed() => {}
            }
        }

        info!("Watchdog stopped gracefully");
    }

    /// One pass over all handlers, unless still warming up.
    pub async fn tick(&mut self) {
        self.refresh_tunables();

        let now = self.now();
        if self.is_warming_up(now) {
            debug!("Warming up...");
            return;
        }

        let outcome = AssertUnwindSafe(self.handle_general()).catch_unwind().await;
        self.settle("Error during general handling", outcome);

        let outcome = AssertUnwindSafe(self.handle_worker()).catch_unwind().await;
        self.settle("Error while handling Worker", outcome);

        let outcome = AssertUnwindSafe(self.handle_console()).catch_unwind().await;
        self.settle("Error while handling Console", outcome);

        let outcome = AssertUnwindSafe(self.handle_watchdog()).catch_unwind().await;
        self.settle("Error while handling Watchdog", outcome);
    }

    fn refresh_tunables(&mut self) {
        match self.deps.settings.tunables() {
            Ok(tunables) => self.tunables = tunables,
            Err(e) => {
                self.capture_failure("Could not read tunables, keeping previous values", &e);
            }
        }
    }

    /// The configured check period, or the failover constant if it cannot be read.
    fn check_period(&self) -> Duration {
        match self.deps.settings.tunables() {
            Ok(tunables) => tunables.check_period(),
            Err(e) => {
                error!(
                    "Could not get check period from configuration, using failover value {:?}: {:#}",
                    FAILOVER_CHECK_PERIOD, e
                );
                self.deps
                    .alerts
                    .capture_error("Could not get check period from configuration", &e);
                FAILOVER_CHECK_PERIOD
            }
        }
    }

    fn is_warming_up(&self, now: DateTime<Utc>) -> bool {
        let started_at = match self.deps.settings.started_at(Component::Watchdog) {
            Ok(Some(at)) => at,
            Ok(None) => self.created_at,
            Err(e) => {
                debug!("Could not read watchdog start time: {:#}", e);
                self.created_at
            }
        };
        now.signed_duration_since(started_at) < self.tunables.warmup_period()
    }

    fn settle(&self, context: &str, outcome: std::thread::Result<Result<()>>) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.capture_failure(context, &e),
            Err(panic) => {
                let err = anyhow::anyhow!("panicked: {}", panic_message(&*panic));
                self.capture_failure(context, &err);
            }
        }
    }

    fn capture_failure(&self, context: &str, err: &anyhow::Error) {
        error!("{}: {:#}", context, err);
        self.deps.alerts.capture_error(context, err);
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    pub(crate) fn report_warning(&mut self, message: &str) {
        warn!("{}", message);
        let period = self.tunables.warning_report_period();
        let now = self.now();
        if !self.throttle.should_throttle(message, period, now) {
            self.deps.alerts.capture_message(AlertLevel::Warning, message);
        }
    }

    pub(crate) fn report_error(&mut self, message: &str) {
        error!("{}", message);
        let period = self.tunables.error_report_period();
        let now = self.now();
        if !self.throttle.should_throttle(message, period, now) {
            self.deps.alerts.capture_message(AlertLevel::Error, message);
        }
    }

    pub(crate) fn report_with_perf_info(&mut self, message: &str) {
        let host = &self.deps.host;
        let load = host
            .load_average()
            .iter()
            .map(|v| format!("{:.2}", v))
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!(
            "{} (load average: {}, CPU: {:.1}%, CPUs: {})",
            message,
            load,
            host.cpu_percent(),
            host.cpu_count()
        );
        self.report_warning(&message);
    }

    pub(crate) fn is_uptime_gte(&self, component: Component, duration: TimeDelta) -> Result<bool> {
        let started_at = self.deps.settings.started_at(component)?;
        Ok(started_at.is_some_and(|at| self.now().signed_duration_since(at) >= duration))
    }

    async fn handle_general(&mut self) -> Result<()> {
        let minimum = self.tunables.minimum_disk_space_bytes;
        let available = self
            .deps
            .host
            .available_disk_space()
            .context("Failed to read available disk space")?;

        if available < minimum {
            self.report_warning(&format!(
                "Less than {} bytes of disk space is remaining: {} bytes",
                minimum, available
            ));
        }
        Ok(())
    }

    async fn handle_worker(&mut self) -> Result<()> {
        let action = self.worker_action().await?;
        if action.is_none() {
            debug!("No action is required for Worker");
            return Ok(());
        }

        debug!("Action is required for Worker: {}", action);
        self.dispatch(Component::Worker, action).await
    }

    async fn handle_console(&mut self) -> Result<()> {
        if self.is_uptime_gte(Component::Console, seconds(DAY_SECONDS))? {
            return self.dispatch(Component::Console, RemedialAction::Restart).await;
        }

        match self.deps.console.probe().await {
            Ok(200) => Ok(()),
            Ok(code) => {
                debug!("Console responded with HTTP {}", code);
                self.dispatch(Component::Console, RemedialAction::Restart).await
            }
            Err(ClientError::Connect(e)) => {
                debug!("Could not connect to Console: {}", e);
                self.dispatch(Component::Console, RemedialAction::Restart).await
            }
            Err(e) => Err(e).context("Failed to probe Console"),
        }
    }

    async fn handle_watchdog(&mut self) -> Result<()> {
        if self.is_uptime_gte(Component::Watchdog, seconds(DAY_SECONDS))? {
            self.dispatch(Component::Watchdog, RemedialAction::Restart)
                .await?;
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
