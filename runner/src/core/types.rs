//! Shared deterministic types for the runner core.
//!
//! These types define stable contracts between the discovery, build, extraction
//! and execution stages. They carry no I/O handles and compare by value so that
//! two cycles over the same sources produce equal results.

use std::fmt;
use std::path::PathBuf;

/// Whether a source module is shared helper code or a batch of exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleRole {
    Helper,
    Exercise,
}

impl ModuleRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleRole::Helper => "helper",
            ModuleRole::Exercise => "exercise",
        }
    }
}

/// One compilable source file declared in a listing and found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceModule {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Path relative to the source root, `/`-separated (`intro/basics.rs`).
    pub relative: String,
    /// Namespace segments followed by the simple name (`["intro", "basics"]`).
    pub segments: Vec<String>,
    pub role: ModuleRole,
}

impl SourceModule {
    /// Fully-qualified logical name (`intro::basics`).
    pub fn name(&self) -> String {
        self.segments.join("::")
    }

    /// Crate name used when the module is compiled on its own.
    pub fn crate_name(&self) -> String {
        format!("koan_{}", self.segments.join("_"))
    }

    /// Identifier of one case inside this module (`intro::basics::e1`).
    pub fn case_id(&self, case: &str) -> String {
        format!("{}::{}", self.name(), case)
    }
}

/// One candidate unit of work recovered from an exercise module's source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseCase {
    pub name: String,
    /// Position among the module's cases in declaration order (0-based).
    pub order: usize,
    /// 1-based line of the function item.
    pub line: usize,
    /// Attached doc comment text, empty if none.
    pub documentation: String,
    /// Predicates of `#[cfg(...)]` attributes on the function, as written.
    pub cfg: Vec<String>,
}

/// Failure classification shown to the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Validation,
    Compile,
    AssertionFailure,
    UnexpectedFailure,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::Validation => "validation",
            DiagnosticKind::Compile => "compile",
            DiagnosticKind::AssertionFailure => "assertion-failure",
            DiagnosticKind::UnexpectedFailure => "unexpected-failure",
        }
    }
}

/// Source position a diagnostic points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File as shown to the learner (relative to the project root when possible).
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One frame of a failure's causal trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// A single detail line attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailLine {
    /// Compiler line carrying the hard-error marker.
    Error(String),
    /// Advisory or informational text.
    Info(String),
    Frame(TraceFrame),
    /// Trace continues into runtime-internal code.
    Elided,
}

/// The rendered outcome of one failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// What failed: a file list, module name or case id.
    pub subject: String,
    pub location: Option<SourceLocation>,
    pub message: String,
    /// Lesson text of the failing case (runtime failures only).
    pub documentation: Option<String>,
    pub lines: Vec<DetailLine>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            location: None,
            message: message.into(),
            documentation: None,
            lines: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    pub fn with_lines(mut self, lines: Vec<DetailLine>) -> Self {
        self.lines = lines;
        self
    }
}

/// Result of one full discover → build → extract → execute pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every selected module ran to completion in this cycle.
    Completed {
        /// Cases that were executed (not skipped) during the cycle.
        cases_run: usize,
        /// Names of the exercise modules the cycle covered, in listing order.
        modules: Vec<String>,
    },
    /// The cycle halted at the first failure.
    Failed(Diagnostic),
}
