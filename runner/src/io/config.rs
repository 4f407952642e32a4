//! Runner configuration stored in `koans.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "koans.toml";

/// Runner configuration (TOML).
///
/// Every field has a default, so an empty or missing file describes the
/// conventional layout: sources under `koans/`, artifacts under `build/`.
/// Relative paths are resolved against the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KoansConfig {
    /// Directory holding helper and exercise sources.
    pub source_dir: PathBuf,

    /// Shared output directory for compiled artifacts.
    pub build_dir: PathBuf,

    /// Listing of helper modules, compiled first as one crate.
    pub helpers_list: PathBuf,

    /// Listing of exercise modules, run in listing order.
    pub exercises_list: PathBuf,

    /// Rust edition used to compile helpers and exercises.
    pub edition: String,

    pub toolchain: ToolchainConfig,
    pub execution: ExecutionConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable. Defaults to `$RUSTC`, then `rustc`.
    pub rustc: String,

    /// Extra arguments appended to every compiler invocation.
    pub extra_args: Vec<String>,

    pub compile_timeout_secs: u64,

    /// Truncate captured compiler output beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock limit for a single exercise case.
    pub case_timeout_secs: u64,

    /// Truncate captured exercise output beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Pause after the first change notification before re-running.
    pub settle_delay_ms: u64,

    /// Poll the filesystem at this interval instead of using native events.
    pub poll_interval_ms: Option<u64>,
}

impl Default for KoansConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("koans"),
            build_dir: PathBuf::from("build"),
            helpers_list: PathBuf::from("koans/helpers.txt"),
            exercises_list: PathBuf::from("koans/exercises.txt"),
            edition: "2021".to_string(),
            toolchain: ToolchainConfig::default(),
            execution: ExecutionConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            rustc: std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string()),
            extra_args: Vec::new(),
            compile_timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            case_timeout_secs: 10,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 300,
            poll_interval_ms: None,
        }
    }
}

impl KoansConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(anyhow!("source_dir must not be empty"));
        }
        if self.build_dir.as_os_str().is_empty() {
            return Err(anyhow!("build_dir must not be empty"));
        }
        if !matches!(self.edition.as_str(), "2015" | "2018" | "2021" | "2024") {
            return Err(anyhow!(
                "edition must be one of 2015, 2018, 2021, 2024 (got '{}')",
                self.edition
            ));
        }
        if self.toolchain.rustc.trim().is_empty() {
            return Err(anyhow!("toolchain.rustc must not be empty"));
        }
        if self.toolchain.compile_timeout_secs == 0 {
            return Err(anyhow!("toolchain.compile_timeout_secs must be > 0"));
        }
        if self.toolchain.output_limit_bytes == 0 {
            return Err(anyhow!("toolchain.output_limit_bytes must be > 0"));
        }
        if self.execution.case_timeout_secs == 0 {
            return Err(anyhow!("execution.case_timeout_secs must be > 0"));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if self.watch.poll_interval_ms == Some(0) {
            return Err(anyhow!("watch.poll_interval_ms must be > 0 when set"));
        }
        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.toolchain.compile_timeout_secs)
    }

    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.case_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.watch.settle_delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `KoansConfig::default()`.
pub fn load_config(path: &Path) -> Result<KoansConfig> {
    if !path.exists() {
        let cfg = KoansConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: KoansConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &KoansConfig) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, KoansConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let cfg = KoansConfig {
            watch: WatchConfig {
                settle_delay_ms: 50,
                poll_interval_ms: Some(100),
            },
            ..KoansConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "source_dir = \"lessons\"\n[execution]\ncase_timeout_secs = 3\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.source_dir, PathBuf::from("lessons"));
        assert_eq!(cfg.execution.case_timeout_secs, 3);
        assert_eq!(cfg.build_dir, PathBuf::from("build"));
        assert_eq!(cfg.watch.settle_delay_ms, 300);
    }

    #[test]
    fn invalid_edition_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "edition = \"2019\"\n").expect("write");
        let err = load_config(&path).expect_err("edition should be rejected");
        assert!(format!("{err:#}").contains("edition must be one of"));
    }
}
