//! File-backed settings: tunables from TOML, agent state from JSON.
//!
//! Other components write to the same state file, so it is re-read on
//! every access instead of being cached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_core::{Component, SettingsStore, Tunables};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub worker_stopped: bool,
    #[serde(default)]
    pub started_at: HashMap<Component, DateTime<Utc>>,
    #[serde(default)]
    pub restarted_at: HashMap<Component, DateTime<Utc>>,
    #[serde(default)]
    pub rebooted_at: Option<DateTime<Utc>>,
}

pub struct FileSettings {
    tunables_path: PathBuf,
    state_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(tunables_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            tunables_path: tunables_path.into(),
            state_path: state_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn load_state(&self) -> Result<AgentState> {
        if !self.state_path.exists() {
            return Ok(AgentState::default());
        }

        let content = std::fs::read_to_string(&self.state_path)
            .with_context(|| format!("Failed to read state from {}", self.state_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state in {}", self.state_path.display()))
    }

    fn update_state(&self, f: impl FnOnce(&mut AgentState)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.load_state()?;
        f(&mut state);
        write_atomically(&self.state_path, &serde_json::to_vec_pretty(&state)?)
    }

    pub fn mark_started(&self, component: Component, at: DateTime<Utc>) -> Result<()> {
        self.update_state(|state| {
            state.started_at.insert(component, at);
        })
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write state to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move state into {}", path.display()))
}

impl SettingsStore for FileSettings {
    fn tunables(&self) -> Result<Tunables> {
        Tunables::load(&self.tunables_path)
    }

    fn is_activated(&self) -> Result<bool> {
        Ok(self.load_state()?.activated)
    }

    fn is_worker_stopped(&self) -> Result<bool> {
        Ok(self.load_state()?.worker_stopped)
    }

    fn started_at(&self, component: Component) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load_state()?.started_at.get(&component).copied())
    }

    fn restarted_at(&self, component: Component) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load_state()?.restarted_at.get(&component).copied())
    }

    fn set_restarted_at(&self, component: Component, at: DateTime<Utc>) -> Result<()> {
        self.update_state(|state| {
            state.restarted_at.insert(component, at);
        })
    }

    fn rebooted_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load_state()?.rebooted_at)
    }

    fn set_rebooted_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.update_state(|state| state.rebooted_at = Some(at))
    }
}
