mod alerts;
mod clients;
mod config;
mod host;
mod settings;
mod supervisor;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::{Collaborators, Component, StopHandle, SystemClock, Watchdog};

use crate::alerts::WebhookAlerts;
use crate::clients::{ConsoleProbe, ServerClient, WorkerStatusClient};
use crate::config::Config;
use crate::host::SysHost;
use crate::settings::FileSettings;
use crate::supervisor::SupervisorControl;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigild=debug,vigil_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!("Starting vigild for agent {}", config.agent_id);
    info!("Config: {:?}", config);

    let settings = Arc::new(FileSettings::new(&config.tunables_path, &config.state_path));
    if let Err(e) = settings.mark_started(Component::Watchdog, Utc::now()) {
        error!("Failed to record watchdog start: {:#}", e);
    }

    let http = clients::http_client(&config)?;
    let deps = Collaborators {
        clock: Arc::new(SystemClock),
        settings,
        coordinator: Arc::new(ServerClient::new(http.clone(), &config)),
        worker: Arc::new(WorkerStatusClient::new(http.clone(), &config)),
        console: Arc::new(ConsoleProbe::new(http.clone(), &config)),
        control: Arc::new(SupervisorControl::new(&config)),
        host: Arc::new(SysHost::new(&config.disk_path)),
        alerts: Arc::new(WebhookAlerts::new(http, &config)),
    };

    let mut watchdog = Watchdog::new(deps);
    let stop = watchdog.stop_handle();
    tokio::spawn(async move {
        stop_on_signal(stop).await;
    });

    watchdog.run().await;
    Ok(())
}

async fn stop_on_signal(stop: StopHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT");
        }
    }

    stop.graceful_stop();
}
