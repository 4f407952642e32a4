//! Test-only builders and scripted stand-ins for the toolchain and watcher.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::cfg::CfgSet;
use crate::io::build::{CompileOutput, CompileRequest, Toolchain};
use crate::io::config::{ExecutionConfig, KoansConfig, WatchConfig};
use crate::io::discovery::ProjectPaths;
use crate::io::watch::ChangeWaiter;

/// Temporary project with `koans/` and empty listings.
pub struct TestCurriculum {
    temp: TempDir,
}

impl TestCurriculum {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp project")?;
        let source_root = temp.path().join("koans");
        fs::create_dir_all(&source_root).context("create koans dir")?;
        fs::write(source_root.join("helpers.txt"), "").context("write helpers.txt")?;
        fs::write(source_root.join("exercises.txt"), "").context("write exercises.txt")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn source_root(&self) -> PathBuf {
        self.root().join("koans")
    }

    /// Config with short timeouts and a fast polling watcher.
    pub fn config(&self) -> KoansConfig {
        KoansConfig {
            execution: ExecutionConfig {
                case_timeout_secs: 10,
                ..ExecutionConfig::default()
            },
            watch: WatchConfig {
                settle_delay_ms: 20,
                poll_interval_ms: Some(50),
            },
            ..KoansConfig::default()
        }
    }

    pub fn paths(&self) -> Result<ProjectPaths> {
        ProjectPaths::resolve(self.root(), &self.config())
    }

    /// Write a file under the source root without listing it.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.source_root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write a helper module and append it to `helpers.txt`.
    pub fn helper(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.write(relative, contents)?;
        self.append_listing("helpers.txt", relative)?;
        Ok(path)
    }

    /// Write an exercise module and append it to `exercises.txt`.
    pub fn exercise(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.write(relative, contents)?;
        self.append_listing("exercises.txt", relative)?;
        Ok(path)
    }

    pub fn append_listing(&self, listing: &str, entry: &str) -> Result<()> {
        let path = self.source_root().join(listing);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(file, "{entry}").with_context(|| format!("append {}", path.display()))?;
        Ok(())
    }
}

/// Toolchain returning queued outputs, then a fixed default, and recording requests.
pub struct ScriptedToolchain {
    queued: RefCell<VecDeque<CompileOutput>>,
    default: CompileOutput,
    requests: RefCell<Vec<CompileRequest>>,
    cfg: CfgSet,
}

impl ScriptedToolchain {
    pub fn succeeding() -> Self {
        Self::with_default(CompileOutput {
            success: true,
            timed_out: false,
            text: String::new(),
        })
    }

    pub fn failing(text: &str) -> Self {
        Self::with_default(CompileOutput {
            success: false,
            timed_out: false,
            text: text.to_string(),
        })
    }

    fn with_default(default: CompileOutput) -> Self {
        Self {
            queued: RefCell::new(VecDeque::new()),
            default,
            requests: RefCell::new(Vec::new()),
            cfg: CfgSet::default(),
        }
    }

    /// Report `print_cfg` (in `rustc --print cfg` format) as the active cfg.
    pub fn with_cfg(mut self, print_cfg: &str) -> Self {
        self.cfg = CfgSet::parse(print_cfg);
        self
    }

    /// Queue outputs consumed before the default applies.
    pub fn then(self, outputs: Vec<CompileOutput>) -> Self {
        self.queued.borrow_mut().extend(outputs);
        self
    }

    pub fn requests(&self) -> Vec<CompileRequest> {
        self.requests.borrow().clone()
    }
}

impl Toolchain for ScriptedToolchain {
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput> {
        self.requests.borrow_mut().push(request.clone());
        let output = self
            .queued
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        Ok(output)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn active_cfg(&self) -> Result<CfgSet> {
        Ok(self.cfg.clone())
    }
}

/// One scripted learner edit.
pub type ScriptedChange = Box<dyn FnMut() -> Result<()>>;

pub fn change(edit: impl FnMut() -> Result<()> + 'static) -> ScriptedChange {
    Box::new(edit)
}

/// Waiter that applies scripted edits instead of watching the filesystem.
///
/// Errors once the script is exhausted so a runaway loop ends the test.
pub struct ScriptedWaiter {
    changes: VecDeque<ScriptedChange>,
    waits: usize,
}

impl ScriptedWaiter {
    pub fn new(changes: Vec<ScriptedChange>) -> Self {
        Self {
            changes: changes.into(),
            waits: 0,
        }
    }

    /// Number of waits requested so far.
    pub fn waits(&self) -> usize {
        self.waits
    }
}

impl ChangeWaiter for ScriptedWaiter {
    fn wait_for_change(&mut self) -> Result<()> {
        self.waits += 1;
        let mut change = self
            .changes
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted change left (wait #{})", self.waits))?;
        change()
    }
}
