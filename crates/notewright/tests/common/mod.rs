//! Common test utilities for notewright integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated home directory so commands never touch the real config
pub struct TestEnv {
    pub home: TempDir,
    pub data_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let home = tempdir()?;
        let data_dir = home.path().join(".notewright");
        let workspace_dir = data_dir.join("notes");

        Ok(Self {
            home,
            data_dir,
            workspace_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// A notewright command running against this environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_notewright"));
        cmd.env("HOME", self.home.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config file with the given JSON
    pub fn write_config(&self, json: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.config_file(), json)?;
        Ok(())
    }

    /// Config with an API key and the default workspace
    pub fn create_config(&self) -> anyhow::Result<()> {
        self.write_config(
            r#"{
  "agent": { "model": "test/model", "default_mode": "researcher" },
  "providers": { "openrouter": { "api_key": "sk-or-test" } }
}"#,
        )
    }
}
