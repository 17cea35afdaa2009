use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::Deserialize;

/// Check period used when the tunables cannot be read.
pub const FAILOVER_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Watchdog thresholds, re-read on every tick so edits apply without a restart.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub check_period_seconds: u64,
    pub warmup_period_seconds: u64,
    pub relax_period_seconds: u64,
    pub heartbeat_enabled: bool,
    pub offline_to_restart_seconds: u64,
    pub offline_to_reboot_seconds: u64,
    pub restart_wait_seconds: u64,
    pub reboot_wait_seconds: u64,
    pub restart_min_period_seconds: u64,
    pub reboot_min_period_seconds: u64,
    pub purge_period_seconds: u64,
    pub expected_http_response_seconds: f64,
    pub minimum_disk_space_bytes: u64,
    pub warning_report_period_seconds: u64,
    pub error_report_period_seconds: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            check_period_seconds: 30,
            warmup_period_seconds: 120,
            relax_period_seconds: 60,
            heartbeat_enabled: true,
            offline_to_restart_seconds: 15 * 60,
            offline_to_reboot_seconds: 60 * 60,
            restart_wait_seconds: 15 * 60,
            reboot_wait_seconds: 60 * 60,
            restart_min_period_seconds: 5 * 60,
            reboot_min_period_seconds: 60 * 60,
            purge_period_seconds: 60 * 60,
            expected_http_response_seconds: 5.0,
            minimum_disk_space_bytes: 100 * 1024 * 1024,
            warning_report_period_seconds: 60 * 60,
            error_report_period_seconds: 60 * 60,
        }
    }
}

impl Tunables {
    /// Loads tunables from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tunables from {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse tunables in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn check_period(&self) -> Duration {
        Duration::from_secs(self.check_period_seconds)
    }

    pub fn warmup_period(&self) -> TimeDelta {
        seconds(self.warmup_period_seconds)
    }

    pub fn relax_period(&self) -> TimeDelta {
        seconds(self.relax_period_seconds)
    }

    pub fn offline_to_restart(&self) -> TimeDelta {
        seconds(self.offline_to_restart_seconds)
    }

    pub fn offline_to_reboot(&self) -> TimeDelta {
        seconds(self.offline_to_reboot_seconds)
    }

    pub fn restart_wait(&self) -> TimeDelta {
        seconds(self.restart_wait_seconds)
    }

    pub fn reboot_wait(&self) -> TimeDelta {
        seconds(self.reboot_wait_seconds)
    }

    pub fn restart_min_period(&self) -> TimeDelta {
        seconds(self.restart_min_period_seconds)
    }

    pub fn reboot_min_period(&self) -> TimeDelta {
        seconds(self.reboot_min_period_seconds)
    }

    pub fn purge_period(&self) -> TimeDelta {
        seconds(self.purge_period_seconds)
    }

    /// Saturates at `Duration::MAX` for infinite or huge values; NaN and negatives are zero.
    pub fn expected_http_response(&self) -> Duration {
        let secs = self.expected_http_response_seconds;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn warning_report_period(&self) -> TimeDelta {
        seconds(self.warning_report_period_seconds)
    }

    pub fn error_report_period(&self) -> TimeDelta {
        seconds(self.error_report_period_seconds)
    }
}

pub fn seconds(secs: u64) -> TimeDelta {
    TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

/// Fractional seconds as a `TimeDelta`, saturating on overflow.
pub fn seconds_f64(secs: f64) -> TimeDelta {
    let millis = (secs * 1000.0).round();
    if !millis.is_finite() || millis >= i64::MAX as f64 {
        return TimeDelta::MAX;
    }
    TimeDelta::try_milliseconds(millis as i64).unwrap_or(TimeDelta::MAX)
}
