pub mod activity;
pub mod config;
pub mod ports;
pub mod service;
pub mod throttle;
pub mod types;

mod dispatch;
mod resolve;

#[cfg(test)]
mod testing;

pub use config::{Tunables, FAILOVER_CHECK_PERIOD};
pub use ports::{
    AlertLevel, Alerts, ClientError, Clock, ConsoleClient, Coordinator, Host, ProcessControl,
    SettingsStore, SystemClock, WorkerClient,
};
pub use service::{Collaborators, StopHandle, Watchdog};
pub use types::*;
