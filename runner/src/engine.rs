//! One discover → build → extract → execute cycle.
//!
//! A cycle halts at the first failure and returns it as a value; only
//! conditions the learner cannot fix by editing a source file are errors.

use std::cell::OnceCell;
use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::cfg::{CfgSet, retain_enabled};
use crate::core::classifier::FailureContext;
use crate::core::extractor::extract_cases;
use crate::core::progress::ProgressState;
use crate::core::types::{CycleOutcome, Diagnostic, DiagnosticKind, SourceModule};
use crate::io::build::{Builder, Toolchain};
use crate::io::config::KoansConfig;
use crate::io::discovery::{Discovery, ProjectPaths, discover, ensure_build_dir};
use crate::io::load::{Invocation, InvokeSettings, LoadContext, Loaded};
use crate::report::{Counter, Reporter};

/// Per-run settings shared by every cycle.
pub struct Engine<'a, T: Toolchain> {
    paths: &'a ProjectPaths,
    toolchain: &'a T,
    settings: InvokeSettings,
    filter: Option<String>,
    /// Queried from the toolchain on first use, then kept for the run.
    cfg: OnceCell<CfgSet>,
}

impl<'a, T: Toolchain> Engine<'a, T> {
    pub fn new(paths: &'a ProjectPaths, toolchain: &'a T, cfg: &KoansConfig) -> Self {
        Self {
            paths,
            toolchain,
            settings: InvokeSettings {
                timeout: cfg.case_timeout(),
                output_limit_bytes: cfg.execution.output_limit_bytes,
                workdir: paths.root.clone(),
            },
            filter: None,
            cfg: OnceCell::new(),
        }
    }

    /// Only run exercise modules whose relative path contains `filter`.
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.is_empty());
        self
    }

    pub fn paths(&self) -> &ProjectPaths {
        self.paths
    }

    fn active_cfg(&self) -> Result<&CfgSet> {
        if let Some(cfg) = self.cfg.get() {
            return Ok(cfg);
        }
        let cfg = self.toolchain.active_cfg()?;
        Ok(self.cfg.get_or_init(|| cfg))
    }

    fn selected(&self, module: &SourceModule) -> bool {
        self.filter
            .as_deref()
            .is_none_or(|filter| module.relative.contains(filter))
    }

    /// Run one cycle, recording every success in `progress`.
    #[instrument(skip_all, fields(cycle = cycle))]
    pub fn run_cycle<W: Write>(
        &self,
        cycle: u64,
        progress: &mut ProgressState,
        reporter: &mut Reporter<W>,
    ) -> Result<CycleOutcome> {
        let sources = match discover(self.paths)? {
            Discovery::Valid(sources) => sources,
            Discovery::Invalid(diagnostic) => return Ok(CycleOutcome::Failed(diagnostic)),
        };
        ensure_build_dir(&self.paths.build_dir)?;

        let builder = Builder::new(self.toolchain, self.paths);
        if let Some(diagnostic) = builder.compile_helpers(&sources.helpers)? {
            return Ok(CycleOutcome::Failed(diagnostic));
        }
        let link_helpers = !sources.helpers.is_empty();

        let modules: Vec<String> = sources
            .exercises
            .iter()
            .filter(|m| self.selected(m))
            .map(SourceModule::name)
            .collect();
        if modules.is_empty() {
            warn!(filter = ?self.filter, "no exercise modules selected");
        }

        let load = LoadContext::open(&self.paths.build_dir, cycle)?;
        let total = sources.exercises.len();
        let mut cases_run = 0usize;

        for (idx, module) in sources.exercises.iter().enumerate() {
            if !self.selected(module) {
                continue;
            }
            let at = Counter::new(idx + 1, total);
            let name = module.name();

            if let Some(diagnostic) = builder.compile_exercise(module, link_helpers)? {
                return Ok(CycleOutcome::Failed(diagnostic));
            }
            if progress.is_module_complete(&name) {
                reporter.module_skipped(at, &name)?;
                continue;
            }

            match self.run_module(module, &builder, &load, progress, reporter)? {
                ModuleRun::Passed { executed } => cases_run += executed,
                ModuleRun::Failed(diagnostic) => return Ok(CycleOutcome::Failed(diagnostic)),
            }
            progress.mark_module_complete(&name);
            reporter.module_done(at, &name)?;
        }

        info!(cycle, cases_run, "cycle completed");
        Ok(CycleOutcome::Completed { cases_run, modules })
    }

    fn run_module<W: Write>(
        &self,
        module: &SourceModule,
        builder: &Builder<'_, T>,
        load: &LoadContext,
        progress: &mut ProgressState,
        reporter: &mut Reporter<W>,
    ) -> Result<ModuleRun> {
        let source = fs::read_to_string(&module.path)
            .with_context(|| format!("read {}", module.path.display()))?;
        let extracted = extract_cases(&source);
        let found = extracted.len();
        let cases = if extracted.iter().any(|case| !case.cfg.is_empty()) {
            retain_enabled(extracted, self.active_cfg()?)
        } else {
            extracted
        };
        if cases.len() < found {
            debug!(module = %module.name(), gated = found - cases.len(), "cases disabled by cfg");
        }
        debug!(module = %module.name(), cases = cases.len(), "extracted cases");
        if cases.is_empty() {
            return Ok(ModuleRun::Passed { executed: 0 });
        }

        let table = match load.load(
            self.toolchain,
            module,
            &cases,
            &builder.module_artifact(module),
            &self.settings,
        )? {
            Loaded::Table(table) => table,
            Loaded::Failed(diagnostic) => return Ok(ModuleRun::Failed(diagnostic)),
        };

        let mut executed = 0usize;
        for case in &cases {
            let case_id = module.case_id(&case.name);
            let at = Counter::new(case.order + 1, cases.len());
            if progress.is_case_complete(&case_id) {
                reporter.case_skipped(at, &case_id)?;
                continue;
            }
            let Some(handle) = table.resolve(&case.name) else {
                return Ok(ModuleRun::Failed(
                    Diagnostic::new(
                        DiagnosticKind::UnexpectedFailure,
                        case_id.clone(),
                        format!("no invocable function named {} in the loaded module", case.name),
                    )
                    .with_documentation(case.documentation.clone()),
                ));
            };
            let ctx = FailureContext {
                case_id: &case_id,
                documentation: &case.documentation,
                source_root: &self.paths.source_root,
                display_root: &self.paths.root,
            };
            match handle.invoke(&self.settings, &ctx)? {
                Invocation::Passed => {
                    progress.mark_case_complete(&case_id);
                    executed += 1;
                    reporter.case_done(at, &case_id)?;
                }
                Invocation::Failed(diagnostic) => return Ok(ModuleRun::Failed(diagnostic)),
            }
        }
        Ok(ModuleRun::Passed { executed })
    }
}

enum ModuleRun {
    Passed { executed: usize },
    Failed(Diagnostic),
}
