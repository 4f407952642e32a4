//! Per-cycle load contexts, dispatch tables and case invocation.
//!
//! A [`LoadContext`] owns one directory under `<build>/.load/`. Harness
//! binaries built into it are only reachable through the [`DispatchTable`]
//! handed out for that cycle, and the directory is removed when the context is
//! dropped, so nothing loaded in one cycle can leak into the next.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::classifier::{
    FailureContext, PanicReport, abnormal_exit, classify_panic, timed_out,
};
use crate::core::compiler_output::classify_lines;
use crate::core::types::{DetailLine, Diagnostic, DiagnosticKind, ExerciseCase, SourceModule};
use crate::io::build::{CompileRequest, CrateType, Toolchain, relativize};
use crate::io::harness::{harness_crate_name, render_harness};
use crate::io::process::run_with_deadline;

/// Directory under the build directory holding per-cycle load contexts.
pub const LOAD_DIR: &str = ".load";

/// Limits and working directory for running harness processes.
#[derive(Debug, Clone)]
pub struct InvokeSettings {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Working directory of exercise processes (the project root).
    pub workdir: PathBuf,
}

/// Isolated directory that owns everything loaded during one cycle.
#[derive(Debug)]
pub struct LoadContext {
    dir: PathBuf,
    search_dir: PathBuf,
}

impl LoadContext {
    /// Discard contexts left by earlier cycles and create a fresh one.
    pub fn open(build_dir: &Path, cycle: u64) -> Result<Self> {
        let base = build_dir.join(LOAD_DIR);
        match fs::remove_dir_all(&base) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("clear {}", base.display()));
            }
        }
        let dir = base.join(format!("cycle-{cycle}"));
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        debug!(dir = %dir.display(), "opened load context");
        Ok(Self {
            dir,
            search_dir: build_dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build the dispatch harness for a compiled module and resolve its cases.
    ///
    /// `artifact` is the module's compiled library. Failures to build or query
    /// the harness are returned as diagnostics.
    #[instrument(skip_all, fields(module = %module.name(), cases = cases.len()))]
    pub fn load<T: Toolchain>(
        &self,
        toolchain: &T,
        module: &SourceModule,
        cases: &[ExerciseCase],
        artifact: &Path,
        settings: &InvokeSettings,
    ) -> Result<Loaded> {
        let crate_name = harness_crate_name(module);
        let root_source = self.dir.join(format!("{crate_name}.rs"));
        fs::write(&root_source, render_harness(module, cases)?)
            .with_context(|| format!("write {}", root_source.display()))?;

        let request = CompileRequest {
            crate_name: crate_name.clone(),
            crate_type: CrateType::Bin,
            root_source,
            out_dir: self.dir.clone(),
            search_dir: self.search_dir.clone(),
            externs: vec![(module.crate_name(), artifact.to_path_buf())],
            deny_warnings: false,
        };
        let output = toolchain.compile(&request)?;
        if !output.success {
            warn!(module = %module.name(), "harness build failed");
            // The context directory changes every cycle; show harness paths
            // by file name and everything else relative to the project.
            let text = relativize(&relativize(&output.text, &self.dir), &settings.workdir);
            let lines = classify_lines(&text);
            return Ok(Loaded::Failed(
                Diagnostic::new(
                    DiagnosticKind::Compile,
                    format!("dispatch harness for {}", module.name()),
                    "could not build the dispatch harness",
                )
                .with_lines(lines),
            ));
        }

        let harness = self
            .dir
            .join(format!("{crate_name}{}", std::env::consts::EXE_SUFFIX));
        let mut cmd = Command::new(&harness);
        cmd.arg("--list").current_dir(&settings.workdir);
        let listed = run_with_deadline(cmd, settings.timeout, settings.output_limit_bytes)
            .with_context(|| format!("list cases of {}", module.name()))?;
        if !listed.succeeded() {
            return Ok(Loaded::Failed(
                Diagnostic::new(
                    DiagnosticKind::UnexpectedFailure,
                    module.name(),
                    format!("dispatch harness did not list its cases ({})", listed.status),
                )
                .with_lines(info_lines(&listed.stderr.text())),
            ));
        }

        let handles = listed
            .stdout
            .text()
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                let handle = CaseHandle {
                    harness: harness.clone(),
                    name: name.to_string(),
                    report_path: self.dir.join(format!("{crate_name}.{name}.panic.json")),
                };
                (name.to_string(), handle)
            })
            .collect();
        Ok(Loaded::Table(DispatchTable { handles }))
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.dir) {
            debug!(dir = %self.dir.display(), err = %err, "failed to remove load context");
        }
    }
}

/// Outcome of loading one module.
#[derive(Debug)]
pub enum Loaded {
    Table(DispatchTable),
    Failed(Diagnostic),
}

/// Case name to invocable handle, valid for one cycle.
#[derive(Debug, Default)]
pub struct DispatchTable {
    handles: BTreeMap<String, CaseHandle>,
}

impl DispatchTable {
    pub fn resolve(&self, name: &str) -> Option<&CaseHandle> {
        self.handles.get(name)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Outcome of one case invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Passed,
    Failed(Diagnostic),
}

/// Invocable reference to one case of a loaded module.
#[derive(Debug, Clone)]
pub struct CaseHandle {
    harness: PathBuf,
    name: String,
    report_path: PathBuf,
}

impl CaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the case in a fresh process and classify how it ended.
    #[instrument(skip_all, fields(case = %ctx.case_id))]
    pub fn invoke(&self, settings: &InvokeSettings, ctx: &FailureContext<'_>) -> Result<Invocation> {
        match fs::remove_file(&self.report_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove stale {}", self.report_path.display()));
            }
        }

        let mut cmd = Command::new(&self.harness);
        cmd.arg(&self.name)
            .arg(&self.report_path)
            .current_dir(&settings.workdir);
        let output = run_with_deadline(cmd, settings.timeout, settings.output_limit_bytes)
            .with_context(|| format!("invoke {}", ctx.case_id))?;

        if output.timed_out {
            return Ok(Invocation::Failed(timed_out(ctx, settings.timeout.as_secs())));
        }
        if output.status.success() {
            debug!("case passed");
            return Ok(Invocation::Passed);
        }

        let mut diagnostic = match read_report(&self.report_path)? {
            Some(report) => {
                let panic_line = report
                    .file
                    .as_deref()
                    .zip(report.line)
                    .and_then(|(file, line)| read_source_line(Path::new(file), line));
                classify_panic(&report, panic_line.as_deref(), ctx)
            }
            None => abnormal_exit(ctx, &output.status.to_string(), &output.stderr.text()),
        };
        let stdout = output.stdout.text();
        if !stdout.trim().is_empty() {
            diagnostic.lines.push(DetailLine::Info("Output:".to_string()));
            diagnostic.lines.extend(info_lines(&stdout));
        }
        debug!(kind = diagnostic.kind.as_str(), "case failed");
        Ok(Invocation::Failed(diagnostic))
    }
}

fn read_report(path: &Path) -> Result<Option<PanicReport>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    match serde_json::from_str(&raw) {
        Ok(report) => Ok(Some(report)),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "ignoring malformed panic report");
            Ok(None)
        }
    }
}

/// Text of 1-based `line` in `file`, if readable.
fn read_source_line(file: &Path, line: u32) -> Option<String> {
    let contents = fs::read_to_string(file).ok()?;
    let index = usize::try_from(line).ok()?.checked_sub(1)?;
    contents.lines().nth(index).map(str::to_string)
}

fn info_lines(text: &str) -> Vec<DetailLine> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| DetailLine::Info(line.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ModuleRole;
    use crate::test_support::{ScriptedToolchain, TestCurriculum};

    fn harness_failure(
        curriculum: &TestCurriculum,
        module: &SourceModule,
        cycle: u64,
    ) -> (Diagnostic, PathBuf) {
        let paths = curriculum.paths().expect("paths");
        let ctx = LoadContext::open(&paths.build_dir, cycle).expect("open");
        let toolchain = ScriptedToolchain::failing(&format!(
            "error[E0425]: cannot find function `ghost` in crate `koan_intro_basics`\n  --> {dir}/run_koan_intro_basics.rs:12:38\n   |\n  ::: {root}/koans/intro/basics.rs:2:1\n",
            dir = ctx.dir().display(),
            root = paths.root.display(),
        ));
        let settings = InvokeSettings {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 4096,
            workdir: paths.root.clone(),
        };
        let loaded = ctx
            .load(
                &toolchain,
                module,
                &[],
                &paths.build_dir.join("libkoan_intro_basics.rlib"),
                &settings,
            )
            .expect("load");
        let Loaded::Failed(diagnostic) = loaded else {
            panic!("expected the harness build to fail");
        };
        (diagnostic, paths.root)
    }

    #[test]
    fn harness_build_failures_are_stable_across_cycles() {
        let curriculum = TestCurriculum::new().expect("curriculum");
        let path = curriculum
            .exercise("intro/basics.rs", "pub fn e1() {}\n")
            .expect("exercise");
        let module = SourceModule {
            path,
            relative: "intro/basics.rs".to_string(),
            segments: vec!["intro".to_string(), "basics".to_string()],
            role: ModuleRole::Exercise,
        };

        let (first, root) = harness_failure(&curriculum, &module, 1);
        let (second, _) = harness_failure(&curriculum, &module, 2);
        assert_eq!(first, second);
        assert_eq!(first.kind, DiagnosticKind::Compile);
        assert_eq!(
            first.lines,
            vec![
                DetailLine::Error(
                    "error[E0425]: cannot find function `ghost` in crate `koan_intro_basics`"
                        .to_string()
                ),
                DetailLine::Info("  --> run_koan_intro_basics.rs:12:38".to_string()),
                DetailLine::Info("   |".to_string()),
                DetailLine::Info("  ::: koans/intro/basics.rs:2:1".to_string()),
            ]
        );
        let root = root.display().to_string();
        assert!(first.lines.iter().all(|line| match line {
            DetailLine::Error(text) | DetailLine::Info(text) => !text.contains(&root),
            _ => true,
        }));
    }

    #[test]
    fn open_wipes_previous_contexts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stale = temp.path().join(LOAD_DIR).join("cycle-1");
        fs::create_dir_all(&stale).expect("mkdir");
        fs::write(stale.join("leftover"), "x").expect("write");

        let ctx = LoadContext::open(temp.path(), 2).expect("open");
        assert!(!stale.exists());
        assert!(ctx.dir().ends_with("cycle-2"));
        assert!(ctx.dir().is_dir());
    }

    #[test]
    fn drop_removes_the_context_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = {
            let ctx = LoadContext::open(temp.path(), 1).expect("open");
            fs::write(ctx.dir().join("harness.rs"), "fn main() {}").expect("write");
            ctx.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn read_source_line_is_one_based() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("a.rs");
        fs::write(&file, "first\nsecond\n").expect("write");
        assert_eq!(read_source_line(&file, 2).as_deref(), Some("second"));
        assert_eq!(read_source_line(&file, 0), None);
        assert_eq!(read_source_line(&file, 9), None);
    }

    #[test]
    fn malformed_report_is_treated_as_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("r.json");
        assert_eq!(read_report(&path).expect("read"), None);
        fs::write(&path, "{not json").expect("write");
        assert_eq!(read_report(&path).expect("read"), None);
        fs::write(
            &path,
            r#"{"message":"X","file":"/k/a.rs","line":3,"column":5,"backtrace":""}"#,
        )
        .expect("write");
        let report = read_report(&path).expect("read").expect("report");
        assert_eq!(report.message, "X");
        assert_eq!(report.line, Some(3));
    }
}
