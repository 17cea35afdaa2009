use anyhow::{Context, Result};
use tracing::debug;

use crate::service::Watchdog;
use crate::types::{Component, Program, RemedialAction};

impl Watchdog {
    /// Applies a remedial action to `component`. Restarts and reboots are
    /// skipped when the previous one is more recent than its minimum period.
    pub async fn dispatch(&mut self, component: Component, action: RemedialAction) -> Result<()> {
        match action {
            RemedialAction::None => Ok(()),
            RemedialAction::Start => self.start(component).await,
            RemedialAction::Restart => self.restart(component).await,
            RemedialAction::Reboot => self.reboot().await,
        }
    }

    async fn start(&mut self, component: Component) -> Result<()> {
        self.report_with_perf_info(&format!("Watchdog requested {} start", component.title()));
        self.deps
            .control
            .start(Program::Component(component))
            .await
            .with_context(|| format!("Failed to start {}", component))
    }

    async fn restart(&mut self, component: Component) -> Result<()> {
        let now = self.now();
        let min_period = self.tunables.restart_min_period();
        if let Some(restarted_at) = self.deps.settings.restarted_at(component)? {
            if now.signed_duration_since(restarted_at) < min_period {
                debug!("Restart is requested for {} again too soon", component.title());
                return Ok(());
            }
        }

        self.report_with_perf_info(&format!("Watchdog requested {} restart", component.title()));
        // Recorded first: restarting the watchdog itself ends this process.
        self.deps.settings.set_restarted_at(component, now)?;
        self.deps
            .control
            .restart(Program::Component(component))
            .await
            .with_context(|| format!("Failed to restart {}", component))?;

        if component == Component::Console {
            self.deps
                .control
                .restart(Program::Proxy)
                .await
                .context("Failed to restart proxy")?;
        }
        Ok(())
    }

    async fn reboot(&mut self) -> Result<()> {
        let now = self.now();
        let min_period = self.tunables.reboot_min_period();
        if let Some(rebooted_at) = self.deps.settings.rebooted_at()? {
            if now.signed_duration_since(rebooted_at) < min_period {
                debug!("Reboot is requested again too soon");
                return Ok(());
            }
        }

        self.report_with_perf_info("Watchdog requested reboot");
        self.deps.settings.set_rebooted_at(now)?;
        self.deps.control.reboot().await.context("Failed to reboot")
    }
}
