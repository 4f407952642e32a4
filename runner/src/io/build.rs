//! Build orchestration: helpers first as one crate, then one crate per exercise module.
//!
//! The [`Toolchain`] trait decouples the orchestrator from the compiler backend.
//! Tests use scripted toolchains that return predetermined outputs without
//! spawning processes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::cfg::CfgSet;
use crate::core::compiler_output::classify_lines;
use crate::core::types::{DetailLine, Diagnostic, DiagnosticKind, SourceModule};
use crate::io::config::KoansConfig;
use crate::io::discovery::ProjectPaths;
use crate::io::process::run_with_deadline;

/// Crate name helpers are compiled under and exercises link against.
pub const HELPERS_CRATE: &str = "helpers";

const HELPERS_ROOT_FILE: &str = "helpers_root.rs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrateType {
    Lib,
    Bin,
}

impl CrateType {
    pub fn as_str(self) -> &'static str {
        match self {
            CrateType::Lib => "rlib",
            CrateType::Bin => "bin",
        }
    }
}

/// One compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub crate_name: String,
    pub crate_type: CrateType,
    /// Crate root source file.
    pub root_source: PathBuf,
    pub out_dir: PathBuf,
    /// Directory searched for transitive dependencies.
    pub search_dir: PathBuf,
    /// `--extern name=path` pairs.
    pub externs: Vec<(String, PathBuf)>,
    /// Treat warnings as errors. Set for learner code only.
    pub deny_warnings: bool,
}

/// Captured result of a compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub success: bool,
    pub timed_out: bool,
    /// Compiler diagnostics (stderr followed by stdout).
    pub text: String,
}

/// Abstraction over compiler backends.
pub trait Toolchain {
    /// Compile one crate. `Err` means the compiler could not be run at all.
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput>;

    /// Wall-clock limit applied to one compilation.
    fn timeout(&self) -> Duration;

    /// Configuration options active for learner crates, deciding which
    /// `#[cfg]`-gated cases exist in a compiled module.
    fn active_cfg(&self) -> Result<CfgSet>;
}

/// Toolchain that spawns `rustc` directly.
#[derive(Debug, Clone)]
pub struct RustcToolchain {
    pub rustc: String,
    pub edition: String,
    pub extra_args: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl RustcToolchain {
    pub fn from_config(cfg: &KoansConfig) -> Self {
        Self {
            rustc: cfg.toolchain.rustc.clone(),
            edition: cfg.edition.clone(),
            extra_args: cfg.toolchain.extra_args.clone(),
            timeout: cfg.compile_timeout(),
            output_limit_bytes: cfg.toolchain.output_limit_bytes,
        }
    }

    fn command(&self, request: &CompileRequest) -> Command {
        let mut cmd = Command::new(&self.rustc);
        cmd.arg("--edition")
            .arg(&self.edition)
            .arg("--crate-type")
            .arg(request.crate_type.as_str())
            .arg("--crate-name")
            .arg(&request.crate_name)
            .arg("-C")
            .arg("debuginfo=2")
            .arg("--color")
            .arg("never");
        if request.deny_warnings {
            cmd.arg("-D").arg("warnings");
        }
        let mut search = std::ffi::OsString::from("dependency=");
        search.push(&request.search_dir);
        cmd.arg("-L").arg(search);
        for (name, path) in &request.externs {
            let mut spec = std::ffi::OsString::from(format!("{name}="));
            spec.push(path);
            cmd.arg("--extern").arg(spec);
        }
        cmd.arg("--out-dir").arg(&request.out_dir);
        cmd.args(&self.extra_args);
        cmd.arg(&request.root_source);
        cmd
    }

    fn print_cfg_command(&self) -> Command {
        let mut cmd = Command::new(&self.rustc);
        cmd.arg("--print")
            .arg("cfg")
            .arg("--edition")
            .arg(&self.edition)
            .args(&self.extra_args);
        cmd
    }
}

impl Toolchain for RustcToolchain {
    #[instrument(skip_all, fields(crate_name = %request.crate_name))]
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput> {
        let output = run_with_deadline(
            self.command(request),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {} for crate {}", self.rustc, request.crate_name))?;
        let mut text = output.stderr.text();
        text.push_str(&output.stdout.text());
        Ok(CompileOutput {
            success: output.succeeded(),
            timed_out: output.timed_out,
            text,
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip_all)]
    fn active_cfg(&self) -> Result<CfgSet> {
        let output = run_with_deadline(
            self.print_cfg_command(),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {} --print cfg", self.rustc))?;
        if !output.succeeded() {
            bail!(
                "{} --print cfg failed: {}",
                self.rustc,
                output.stderr.text().trim()
            );
        }
        let cfg = CfgSet::parse(&output.stdout.text());
        debug!(?cfg, "active cfg");
        Ok(cfg)
    }
}

/// Drives the toolchain for helpers and exercise modules.
pub struct Builder<'a, T: Toolchain> {
    toolchain: &'a T,
    paths: &'a ProjectPaths,
}

impl<'a, T: Toolchain> Builder<'a, T> {
    pub fn new(toolchain: &'a T, paths: &'a ProjectPaths) -> Self {
        Self { toolchain, paths }
    }

    /// Compiled helpers library, for `--extern`.
    pub fn helpers_artifact(&self) -> PathBuf {
        self.paths
            .build_dir
            .join(format!("lib{HELPERS_CRATE}.rlib"))
    }

    /// Compiled library of one exercise module.
    pub fn module_artifact(&self, module: &SourceModule) -> PathBuf {
        self.paths
            .build_dir
            .join(format!("lib{}.rlib", module.crate_name()))
    }

    /// Compile every helper module as one crate.
    ///
    /// Returns `None` on success (or when there are no helpers).
    #[instrument(skip_all, fields(helpers = helpers.len()))]
    pub fn compile_helpers(&self, helpers: &[SourceModule]) -> Result<Option<Diagnostic>> {
        if helpers.is_empty() {
            debug!("no helpers to compile");
            return Ok(None);
        }
        let root_source = self.paths.build_dir.join(HELPERS_ROOT_FILE);
        fs::write(&root_source, render_helpers_root(helpers))
            .with_context(|| format!("write {}", root_source.display()))?;

        let request = CompileRequest {
            crate_name: HELPERS_CRATE.to_string(),
            crate_type: CrateType::Lib,
            root_source,
            out_dir: self.paths.build_dir.clone(),
            search_dir: self.paths.build_dir.clone(),
            externs: Vec::new(),
            deny_warnings: true,
        };
        self.run(&request, helpers)
    }

    /// Compile one exercise module against the helpers.
    #[instrument(skip_all, fields(module = %module.name()))]
    pub fn compile_exercise(
        &self,
        module: &SourceModule,
        link_helpers: bool,
    ) -> Result<Option<Diagnostic>> {
        let mut externs = Vec::new();
        if link_helpers {
            externs.push((HELPERS_CRATE.to_string(), self.helpers_artifact()));
        }
        let request = CompileRequest {
            crate_name: module.crate_name(),
            crate_type: CrateType::Lib,
            root_source: module.path.clone(),
            out_dir: self.paths.build_dir.clone(),
            search_dir: self.paths.build_dir.clone(),
            externs,
            deny_warnings: true,
        };
        self.run(&request, std::slice::from_ref(module))
    }

    fn run(&self, request: &CompileRequest, sources: &[SourceModule]) -> Result<Option<Diagnostic>> {
        let output = self.toolchain.compile(request)?;
        if output.success {
            info!(crate_name = %request.crate_name, "compiled");
            return Ok(None);
        }
        let files: Vec<String> = sources
            .iter()
            .map(|m| self.paths.display(&m.path))
            .collect();
        let subject = files.join(", ");
        if output.timed_out {
            warn!(crate_name = %request.crate_name, "compiler timed out");
            return Ok(Some(Diagnostic::new(
                DiagnosticKind::Compile,
                subject,
                format!(
                    "compiler did not finish within {} seconds",
                    self.toolchain.timeout().as_secs()
                ),
            )));
        }
        let text = relativize(&output.text, &self.paths.root);
        let mut lines = classify_lines(&text);
        if lines.is_empty() {
            lines.push(DetailLine::Info("(no compiler output)".to_string()));
        }
        debug!(crate_name = %request.crate_name, lines = lines.len(), "compile failed");
        Ok(Some(
            Diagnostic::new(DiagnosticKind::Compile, subject, "compilation failed").with_lines(lines),
        ))
    }
}

/// Show compiler paths relative to `root`.
pub(crate) fn relativize(text: &str, root: &Path) -> String {
    let prefix = format!("{}{}", root.display(), std::path::MAIN_SEPARATOR);
    text.replace(&prefix, "")
}

#[derive(Default)]
struct ModuleTree<'a> {
    children: BTreeMap<&'a str, ModuleTree<'a>>,
    file: Option<&'a Path>,
}

/// Generate the crate root declaring each helper file at its namespace path.
pub fn render_helpers_root(helpers: &[SourceModule]) -> String {
    let mut tree = ModuleTree::default();
    for helper in helpers {
        let mut node = &mut tree;
        for segment in &helper.segments {
            node = node.children.entry(segment.as_str()).or_default();
        }
        node.file = Some(&helper.path);
    }
    let mut out = String::from("// Generated by koans. Do not edit.\n");
    render_tree(&tree, 0, &mut out);
    out
}

fn render_tree(tree: &ModuleTree<'_>, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    for (name, node) in &tree.children {
        match node.file {
            // Validation rejects helpers that are also namespaces, so a file
            // module never has children here.
            Some(file) => {
                let _ = writeln!(out, "{indent}#[path = {:?}]", file.to_string_lossy());
                let _ = writeln!(out, "{indent}pub mod {name};");
            }
            None => {
                let _ = writeln!(out, "{indent}pub mod {name} {{");
                render_tree(node, depth + 1, out);
                let _ = writeln!(out, "{indent}}}");
            }
        }
    }
}
