use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";

pub struct VmshDirs {
    pub state: PathBuf,
    pub config: PathBuf,
}

impl VmshDirs {
    /// Locate platform-specific state/config directories for vmsh.
    ///
    /// # Errors
    /// Returns an error if standard OS directories cannot be determined.
    pub fn new() -> Result<Self> {
        let state = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .context("state directory not found")?
            .join("vmsh");

        let config = dirs::config_dir()
            .context("config directory not found")?
            .join("vmsh");

        Ok(Self { state, config })
    }

    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.state.join("logs")
    }
}

/// What the shell remembers between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellState {
    #[serde(default)]
    pub pool: Option<String>,
}

impl ShellState {
    /// Load the remembered state, or the default when nothing was saved yet.
    ///
    /// # Errors
    /// Returns an error if the state file exists but cannot be read or parsed.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let state_file = config_dir.join(STATE_FILE);
        if !state_file.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&state_file)
            .with_context(|| format!("Failed to read {}", state_file.display()))?;
        serde_json::from_str(&content).context("Failed to parse shell state")
    }

    /// # Errors
    /// Returns an error if the directory cannot be created or the file written.
    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_dir.join(STATE_FILE), content)?;
        Ok(())
    }
}
