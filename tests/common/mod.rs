//! Common test utilities for sprintplanner integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.config/sprintplanner/` or `~/.local/share/sprintplanner/`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with isolated config and data directories.
///
/// The `sp()` method returns a `Command` that sets `SP_CONFIG_DIR` and
/// `SP_DATA_DIR` per-invocation and clears the ambient `SP_*` variables,
/// making tests parallel-safe.
pub struct TestEnv {
    pub config_dir: TempDir,
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the sp binary with isolated directories.
    pub fn sp(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_sp"));
        cmd.env("SP_CONFIG_DIR", self.config_dir.path());
        cmd.env("SP_DATA_DIR", self.data_dir.path());
        for name in [
            "SP_ORGANIZATION",
            "SP_PROJECT",
            "SP_BASE_URL",
            "SP_ADO_TOKEN",
            "SP_LOG",
        ] {
            cmd.env_remove(name);
        }
        cmd
    }

    /// An `sp` command pointed at `base_url` for `contoso/Contoso`.
    pub fn sp_against(&self, base_url: &str) -> Command {
        let mut cmd = self.sp();
        cmd.args(["--org", "contoso", "--project", "Contoso", "--base-url", base_url]);
        cmd
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.path().join("config.kdl")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.path().join("state.kdl")
    }

    /// Write config.kdl verbatim.
    pub fn write_config(&self, content: &str) {
        write_file(&self.config_path(), content);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Parse a command's stdout as JSON.
pub fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}
