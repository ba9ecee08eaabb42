//! Platform configuration stored at `/etc/plat/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/plat/config.toml";

/// Platform configuration (TOML).
///
/// Every field has a default matching the stock board image, so a missing
/// file or a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatConfig {
    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    pub fruid: FruidConfig,
    pub password: PasswordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FruidConfig {
    /// Path to the FRU inventory utility.
    pub fru_util: PathBuf,

    /// Wall-clock budget for a single `fru-util` invocation.
    pub timeout_secs: u64,

    /// Number of fan slots populated on this board.
    pub fan_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PasswordConfig {
    pub useradd: PathBuf,
    pub passwd: PathBuf,

    pub useradd_timeout_secs: u64,

    /// How long to wait for each `passwd` prompt.
    pub step_timeout_millis: u64,

    /// Credential files copied to `persist_dir` after every attempt.
    pub credential_files: Vec<PathBuf>,

    /// Directory on non-volatile storage.
    pub persist_dir: PathBuf,
}

impl Default for FruidConfig {
    fn default() -> Self {
        Self {
            fru_util: PathBuf::from("/usr/local/bin/fru-util"),
            timeout_secs: 5,
            fan_count: 4,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            useradd: PathBuf::from("useradd"),
            passwd: PathBuf::from("passwd"),
            useradd_timeout_secs: 5,
            step_timeout_millis: 1000,
            credential_files: vec![PathBuf::from("/etc/passwd"), PathBuf::from("/etc/shadow")],
            persist_dir: PathBuf::from("/mnt/data/etc"),
        }
    }
}

impl Default for PlatConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 1_000_000,
            fruid: FruidConfig::default(),
            password: PasswordConfig::default(),
        }
    }
}

impl FruidConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PasswordConfig {
    pub fn useradd_timeout(&self) -> Duration {
        Duration::from_secs(self.useradd_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_millis)
    }
}

impl PlatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.fruid.fru_util.as_os_str().is_empty() {
            return Err(anyhow!("fruid.fru_util must be set"));
        }
        if self.fruid.timeout_secs == 0 {
            return Err(anyhow!("fruid.timeout_secs must be > 0"));
        }
        if self.fruid.fan_count == 0 {
            return Err(anyhow!("fruid.fan_count must be > 0"));
        }
        if self.password.useradd.as_os_str().is_empty()
            || self.password.passwd.as_os_str().is_empty()
        {
            return Err(anyhow!("password.useradd and password.passwd must be set"));
        }
        if self.password.useradd_timeout_secs == 0 {
            return Err(anyhow!("password.useradd_timeout_secs must be > 0"));
        }
        if self.password.step_timeout_millis == 0 {
            return Err(anyhow!("password.step_timeout_millis must be > 0"));
        }
        if self.password.persist_dir.as_os_str().is_empty() {
            return Err(anyhow!("password.persist_dir must be set"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlatConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlatConfig> {
    if !path.exists() {
        let cfg = PlatConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlatConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlatConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
