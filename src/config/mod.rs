//! Configuration and state management for Sprintplanner.
//!
//! Two KDL files are kept apart:
//!
//! ## config.kdl - User preferences
//!
//! Located at `$SP_CONFIG_DIR/config.kdl`, or `~/.config/sprintplanner/config.kdl`.
//!
//! Contains organization and project defaults, the service root, the output
//! format, the test tag literals, favorite area roots and the injection and
//! handshake schedules. See [`SpConfig`].
//!
//! ## state.kdl - Secrets
//!
//! Located at `$SP_DATA_DIR/state.kdl`, or `~/.local/share/sprintplanner/state.kdl`.
//!
//! Contains the `ado-token` personal access token.
//!
//! ## Security
//!
//! **CRITICAL**: `state.kdl` is written with 0600 permissions (owner read/write only).
//!
//! ## Precedence
//!
//! CLI flag > environment variable > file > default. See [`resolver`].

pub mod resolver;
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use kdl::KdlDocument;

use crate::{Error, Result};

pub use resolver::{
    ConfigOverrides, Resolved, ResolvedConfig, ResolvedState, TOKEN_ENV, ValueSource,
    resolve_config, resolve_state,
};
#[cfg(unix)]
pub use schema::STATE_FILE_MODE;
pub use schema::{CONFIG_KEYS, OutputFormat, SpConfig, SpState};

/// Overrides the directory holding config.kdl.
pub const CONFIG_DIR_ENV: &str = "SP_CONFIG_DIR";

/// Overrides the directory holding state.kdl.
pub const DATA_DIR_ENV: &str = "SP_DATA_DIR";

const APP_DIR: &str = "sprintplanner";
const CONFIG_FILE: &str = "config.kdl";
const STATE_FILE: &str = "state.kdl";

/// Locations of config.kdl and state.kdl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

fn dir_from_env(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl ConfigStore {
    pub fn new(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve directories from `SP_CONFIG_DIR` / `SP_DATA_DIR`, falling back
    /// to the platform config and data directories.
    pub fn from_env() -> Result<Self> {
        let config_dir = match dir_from_env(CONFIG_DIR_ENV) {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or_else(|| Error::Other("Could not determine config directory".to_string()))?
                .join(APP_DIR),
        };
        let data_dir = match dir_from_env(DATA_DIR_ENV) {
            Some(dir) => dir,
            None => dirs::data_dir()
                .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?
                .join(APP_DIR),
        };
        Ok(Self::new(config_dir, data_dir))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    /// Load config.kdl. A missing file yields the empty config.
    pub fn load_config(&self) -> Result<SpConfig> {
        let config = match read_kdl(&self.config_path())? {
            Some(doc) => SpConfig::from_kdl(&doc),
            None => SpConfig::default(),
        };
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    pub fn save_config(&self, config: &SpConfig) -> Result<()> {
        config.validate().map_err(Error::Config)?;
        fs::create_dir_all(&self.config_dir)?;
        fs::write(self.config_path(), config.to_kdl().to_string())?;
        Ok(())
    }

    /// Load state.kdl. A missing file yields the empty state.
    pub fn load_state(&self) -> Result<SpState> {
        Ok(read_kdl(&self.state_path())?
            .map(|doc| SpState::from_kdl(&doc))
            .unwrap_or_default())
    }

    /// Write state.kdl, owner-only on Unix.
    pub fn save_state(&self, state: &SpState) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        write_private(&self.state_path(), state.to_kdl().to_string().as_bytes())
    }
}

fn read_kdl(path: &Path) -> Result<Option<KdlDocument>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let doc = text
        .parse::<KdlDocument>()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(doc))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(STATE_FILE_MODE)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(STATE_FILE_MODE))?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents)?;
    Ok(())
}
