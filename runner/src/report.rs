//! Learner-facing console output.
//!
//! Everything the learner reads goes through [`Reporter`]; developer diagnostics
//! go through `tracing` instead.

use std::io::{self, Write};

use crate::core::types::{DetailLine, Diagnostic, DiagnosticKind, TraceFrame};

const RULE: &str = "------------------------------------------------------------";
const SEPARATOR: &str = "=============================================================";

/// Position of an item within its enclosing sequence (`[i/n]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// 1-based.
    pub index: usize,
    pub total: usize,
}

impl Counter {
    pub fn new(index: usize, total: usize) -> Self {
        Self { index, total }
    }
}

/// Renders progress and diagnostics to any sink.
pub struct Reporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn case_done(&mut self, at: Counter, case_id: &str) -> io::Result<()> {
        writeln!(self.out, "Koan done [{}/{}]: {case_id}", at.index, at.total)
    }

    pub fn case_skipped(&mut self, at: Counter, case_id: &str) -> io::Result<()> {
        writeln!(self.out, "Koan skipped [{}/{}]: {case_id}", at.index, at.total)
    }

    pub fn module_done(&mut self, at: Counter, module: &str) -> io::Result<()> {
        writeln!(self.out, "Koan set done [{}/{}]: {module}", at.index, at.total)
    }

    pub fn module_skipped(&mut self, at: Counter, module: &str) -> io::Result<()> {
        writeln!(self.out, "Koan set skipped [{}/{}]: {module}", at.index, at.total)
    }

    pub fn waiting(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Edit the file(s) and save to continue")?;
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn finished(&mut self) -> io::Result<()> {
        writeln!(self.out, "Congratulations, you finished the koans!")?;
        self.out.flush()
    }

    /// Render one diagnostic inside a banner.
    pub fn diagnostic(&mut self, diagnostic: &Diagnostic) -> io::Result<()> {
        match diagnostic.kind {
            DiagnosticKind::Validation => self.validation(diagnostic)?,
            DiagnosticKind::Compile => self.compile(diagnostic)?,
            DiagnosticKind::AssertionFailure | DiagnosticKind::UnexpectedFailure => {
                self.runtime(diagnostic)?
            }
        }
        self.out.flush()
    }

    fn validation(&mut self, d: &Diagnostic) -> io::Result<()> {
        writeln!(self.out, "Validation failed for {}: {}", d.subject, d.message)?;
        self.open()?;
        writeln!(self.out, "  |")?;
        for line in &d.lines {
            self.detail(line, "")?;
        }
        self.close()
    }

    fn compile(&mut self, d: &Diagnostic) -> io::Result<()> {
        writeln!(self.out, "Compilation failed when compiling {}", d.subject)?;
        self.open()?;
        writeln!(self.out, "  |")?;
        if d.lines.is_empty() {
            writeln!(self.out, "E | {}", d.message)?;
        }
        for line in &d.lines {
            self.detail(line, "")?;
        }
        self.close()
    }

    fn runtime(&mut self, d: &Diagnostic) -> io::Result<()> {
        writeln!(self.out, "Invocation failed when running {}", d.subject)?;
        self.open()?;
        if let Some(doc) = d.documentation.as_deref().filter(|doc| !doc.is_empty()) {
            for line in doc.lines() {
                self.body(line)?;
            }
        }
        writeln!(self.out, "  |{SEPARATOR}")?;
        writeln!(self.out, "  |")?;

        if d.kind == DiagnosticKind::AssertionFailure {
            let mut message = d.message.lines();
            let first = message.next().unwrap_or_default();
            match &d.location {
                Some(location) => writeln!(self.out, "E | {location}: assert: {first}")?,
                None => writeln!(self.out, "E | assert: {first}")?,
            }
            for rest in message {
                writeln!(self.out, "  |   {rest}")?;
            }
        } else {
            writeln!(self.out, "  | Unrecognized failure:")?;
            for line in d.message.lines() {
                writeln!(self.out, "  |    {line}")?;
            }
            if let Some(location) = &d.location {
                writeln!(self.out, "  |    at {location}")?;
            }
        }
        for line in &d.lines {
            self.detail(line, "   ")?;
        }
        writeln!(self.out, "  |")?;
        self.close()
    }

    fn open(&mut self) -> io::Result<()> {
        writeln!(self.out, "  /{RULE}")
    }

    fn close(&mut self) -> io::Result<()> {
        writeln!(self.out, "  \\{RULE}")
    }

    fn body(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            writeln!(self.out, "  |")
        } else {
            writeln!(self.out, "  | {text}")
        }
    }

    fn detail(&mut self, line: &DetailLine, indent: &str) -> io::Result<()> {
        match line {
            DetailLine::Error(text) => writeln!(self.out, "E | {indent}{text}"),
            DetailLine::Info(text) if text.is_empty() => writeln!(self.out, "  |"),
            DetailLine::Info(text) => writeln!(self.out, "  | {indent}{text}"),
            DetailLine::Frame(TraceFrame { function, location }) => match location {
                Some(location) => writeln!(self.out, "  |        at {function} ({location})"),
                None => writeln!(self.out, "  |        at {function}"),
            },
            DetailLine::Elided => writeln!(self.out, "  |        ..."),
        }
    }
}
