//! Deterministic classification of failed exercise invocations.
//!
//! A panic raised by an assert-family macro is an expectation the learner has
//! not met yet and is reported with its location and the lesson text. Any other
//! fault is reported with the slice of its backtrace that runs through the
//! learner's sources.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::core::types::{DetailLine, Diagnostic, DiagnosticKind, SourceLocation, TraceFrame};

static ASSERT_MACRO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:std|core)::)?(?:debug_)?assert(?:_eq|_ne)?!\s*[\(\[\{]")
        .expect("assert macro regex")
});

static FRAME_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+at (?P<file>.+?):(?P<line>\d+)(?::(?P<col>\d+))?\s*$").expect("frame at regex")
});

static FRAME_SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(?:\d+:\s+)?(?:0x[0-9a-fA-F]+\s+-\s+)?(?P<name>\S.*?)\s*$")
        .expect("frame symbol regex")
});

static SYMBOL_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("symbol hash regex"));

/// Panic details written by the dispatch harness.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanicReport {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    #[serde(default)]
    pub backtrace: String,
}

/// A backtrace frame with the raw (absolute) file path the toolchain recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Inputs needed to turn a panic report into a diagnostic.
#[derive(Debug, Clone)]
pub struct FailureContext<'a> {
    /// `module::case` id of the failing case.
    pub case_id: &'a str,
    pub documentation: &'a str,
    /// Frames under this directory count as learner code.
    pub source_root: &'a Path,
    /// Paths are shown relative to this directory when possible.
    pub display_root: &'a Path,
}

/// Classify a panic into an assertion failure or an unexpected failure.
///
/// `panic_line` is the text of the source line the panic location points at,
/// when it could be read.
pub fn classify_panic(
    report: &PanicReport,
    panic_line: Option<&str>,
    ctx: &FailureContext<'_>,
) -> Diagnostic {
    let location = report_location(report, ctx.display_root);
    if is_assertion(report, panic_line) {
        let mut diagnostic = Diagnostic::new(
            DiagnosticKind::AssertionFailure,
            ctx.case_id,
            report.message.clone(),
        )
        .with_documentation(ctx.documentation);
        if let Some(location) = location {
            diagnostic = diagnostic.with_location(location);
        }
        return diagnostic;
    }

    let frames = parse_backtrace(&report.backtrace);
    let trace = learner_trace(&frames, ctx.source_root, ctx.display_root);
    let mut diagnostic = Diagnostic::new(
        DiagnosticKind::UnexpectedFailure,
        ctx.case_id,
        report.message.clone(),
    )
    .with_documentation(ctx.documentation)
    .with_lines(trace);
    if let Some(location) = location {
        diagnostic = diagnostic.with_location(location);
    }
    diagnostic
}

/// Failure of a case that ended without writing a panic report.
pub fn abnormal_exit(ctx: &FailureContext<'_>, status: &str, stderr: &str) -> Diagnostic {
    let lines = stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| DetailLine::Info(line.to_string()))
        .collect();
    Diagnostic::new(
        DiagnosticKind::UnexpectedFailure,
        ctx.case_id,
        format!("exercise process ended abnormally ({status})"),
    )
    .with_documentation(ctx.documentation)
    .with_lines(lines)
}

/// Failure of a case that ran past its time limit.
pub fn timed_out(ctx: &FailureContext<'_>, timeout_secs: u64) -> Diagnostic {
    Diagnostic::new(
        DiagnosticKind::UnexpectedFailure,
        ctx.case_id,
        format!("did not finish within {timeout_secs} seconds (infinite loop?)"),
    )
    .with_documentation(ctx.documentation)
}

/// True if the panic came from an assert-family macro.
///
/// Std's own assertion messages are recognised directly; custom-message
/// assertions are recognised by the macro sitting at the panic column.
pub fn is_assertion(report: &PanicReport, panic_line: Option<&str>) -> bool {
    if report.message.starts_with("assertion failed")
        || report.message.starts_with("assertion `left")
    {
        return true;
    }
    let (Some(text), Some(column)) = (panic_line, report.column) else {
        return false;
    };
    let offset = column.saturating_sub(1) as usize;
    let by_chars: String = text.chars().skip(offset).collect();
    if ASSERT_MACRO_RE.is_match(&by_chars) {
        return true;
    }
    text.get(offset..)
        .is_some_and(|rest| ASSERT_MACRO_RE.is_match(rest))
}

/// Parse the alternate (`{:#}`) rendering of a captured backtrace.
pub fn parse_backtrace(text: &str) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FRAME_AT_RE.captures(line) {
            if let Some(frame) = frames.last_mut()
                && frame.file.is_none()
            {
                frame.file = Some(caps["file"].to_string());
                frame.line = caps["line"].parse().ok();
            }
            continue;
        }
        if let Some(caps) = FRAME_SYMBOL_RE.captures(line) {
            frames.push(RawFrame {
                function: SYMBOL_HASH_RE.replace(&caps["name"], "").into_owned(),
                file: None,
                line: None,
            });
        }
    }
    frames
}

/// Slice a trace down to the frames that run through learner code.
///
/// Leading panic machinery is skipped; frames are kept while their file lies
/// under `source_root`, and the first frame outside it becomes an ellipsis.
pub fn learner_trace(frames: &[RawFrame], source_root: &Path, display_root: &Path) -> Vec<DetailLine> {
    let is_learner = |frame: &RawFrame| {
        frame
            .file
            .as_deref()
            .is_some_and(|file| Path::new(file).starts_with(source_root))
    };
    let mut lines = Vec::new();
    let Some(start) = frames.iter().position(is_learner) else {
        return lines;
    };
    for frame in &frames[start..] {
        if !is_learner(frame) {
            lines.push(DetailLine::Elided);
            break;
        }
        lines.push(DetailLine::Frame(TraceFrame {
            function: frame.function.clone(),
            location: frame.file.as_deref().map(|file| SourceLocation {
                file: display_path(file, display_root),
                line: frame.line.unwrap_or(0),
                column: None,
            }),
        }));
    }
    lines
}

/// Show `file` relative to `root` when it lies underneath it.
pub fn display_path(file: &str, root: &Path) -> String {
    match Path::new(file).strip_prefix(root) {
        Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
        Err(_) => file.to_string(),
    }
}

fn report_location(report: &PanicReport, display_root: &Path) -> Option<SourceLocation> {
    let file = report.file.as_deref()?;
    Some(SourceLocation {
        file: display_path(file, display_root),
        line: report.line.unwrap_or(0),
        column: report.column,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_BACKTRACE: &str = "   0:     0x55d5c7a1b2c3 - std::backtrace_rs::backtrace::libunwind::trace::h0123456789abcdef
                               at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1:     0x55d5c7a1b2c4 - std::backtrace::Backtrace::force_capture::h0123456789abcdef
                               at /rustc/abc/library/std/src/backtrace.rs:312:9
   2:     0x55d5c7a1b2c5 - koan_harness::main::{{closure}}::h0123456789abcdef
                               at /work/build/.load/cycle-1/intro_basics.rs:40:25
   3:     0x55d5c7a1b2c6 - core::option::unwrap_failed::h0123456789abcdef
                               at /rustc/abc/library/core/src/option.rs:2015:5
   4:     0x55d5c7a1b2c7 - koan_intro_basics::lookup::h0123456789abcdef
                               at /work/koans/intro/basics.rs:30:5
                             koan_intro_basics::e2::h0123456789abcdef
                               at /work/koans/intro/basics.rs:14:5
   5:     0x55d5c7a1b2c8 - koan_harness::dispatch::h0123456789abcdef
                               at /work/build/.load/cycle-1/intro_basics.rs:20:9
   6:     0x55d5c7a1b2c9 - main
   7:     0x0 - <unknown>
";

    fn ctx<'a>() -> FailureContext<'a> {
        FailureContext {
            case_id: "intro::basics::e2",
            documentation: "Options may be empty.",
            source_root: Path::new("/work/koans"),
            display_root: Path::new("/work"),
        }
    }

    fn report(message: &str, column: u32) -> PanicReport {
        PanicReport {
            message: message.to_string(),
            file: Some("/work/koans/intro/basics.rs".to_string()),
            line: Some(14),
            column: Some(column),
            backtrace: SAMPLE_BACKTRACE.to_string(),
        }
    }

    #[test]
    fn std_assertion_messages_are_assertions() {
        assert!(is_assertion(&report("assertion failed: x > 1", 1), None));
        assert!(is_assertion(
            &report("assertion `left == right` failed\n  left: 1\n right: 2", 1),
            None
        ));
    }

    #[test]
    fn custom_message_assert_is_recognised_by_column() {
        let line = "    assert!(total == 3, \"X\");";
        assert!(is_assertion(&report("X", 5), Some(line)));
        let line = "    assert_eq!(total, 3, \"X\");";
        assert!(is_assertion(&report("X", 5), Some(line)));
    }

    #[test]
    fn unwrap_inside_assert_is_not_an_assertion() {
        let line = "    assert_eq!(value.unwrap(), 3);";
        let col = line.find("unwrap").expect("unwrap column") as u32 + 1;
        assert!(!is_assertion(
            &report("called `Option::unwrap()` on a `None` value", col),
            Some(line)
        ));
    }

    #[test]
    fn classify_assertion_uses_panic_location_and_docs() {
        let line = "    assert!(false, \"X\");";
        let diagnostic = classify_panic(&report("X", 5), Some(line), &ctx());
        assert_eq!(diagnostic.kind, DiagnosticKind::AssertionFailure);
        assert_eq!(diagnostic.message, "X");
        assert_eq!(diagnostic.documentation.as_deref(), Some("Options may be empty."));
        assert_eq!(
            diagnostic.location,
            Some(SourceLocation {
                file: "koans/intro/basics.rs".to_string(),
                line: 14,
                column: Some(5),
            })
        );
        assert!(diagnostic.lines.is_empty());
    }

    #[test]
    fn parse_backtrace_reads_symbols_and_locations() {
        let frames = parse_backtrace(SAMPLE_BACKTRACE);
        assert_eq!(frames.len(), 9);
        assert_eq!(frames[4].function, "koan_intro_basics::lookup");
        assert_eq!(frames[5].function, "koan_intro_basics::e2");
        assert_eq!(frames[5].file.as_deref(), Some("/work/koans/intro/basics.rs"));
        assert_eq!(frames[5].line, Some(14));
        assert_eq!(frames[7].function, "main");
        assert_eq!(frames[7].file, None);
    }

    #[test]
    fn unexpected_failure_trace_stops_at_runtime_code() {
        let line = "    let v = lookup();";
        let diagnostic = classify_panic(
            &report("called `Option::unwrap()` on a `None` value", 13),
            Some(line),
            &ctx(),
        );
        assert_eq!(diagnostic.kind, DiagnosticKind::UnexpectedFailure);
        assert_eq!(
            diagnostic.lines,
            vec![
                DetailLine::Frame(TraceFrame {
                    function: "koan_intro_basics::lookup".to_string(),
                    location: Some(SourceLocation {
                        file: "koans/intro/basics.rs".to_string(),
                        line: 30,
                        column: None,
                    }),
                }),
                DetailLine::Frame(TraceFrame {
                    function: "koan_intro_basics::e2".to_string(),
                    location: Some(SourceLocation {
                        file: "koans/intro/basics.rs".to_string(),
                        line: 14,
                        column: None,
                    }),
                }),
                DetailLine::Elided,
            ]
        );
    }

    #[test]
    fn trace_without_learner_frames_is_empty() {
        let frames = vec![RawFrame {
            function: "std::rt::lang_start".to_string(),
            file: Some("/rustc/abc/library/std/src/rt.rs".to_string()),
            line: Some(1),
        }];
        assert!(learner_trace(&frames, Path::new("/work/koans"), Path::new("/work")).is_empty());
    }

    #[test]
    fn abnormal_exit_keeps_stderr_lines() {
        let diagnostic = abnormal_exit(&ctx(), "exit status: 3", "bye\n\n");
        assert_eq!(diagnostic.kind, DiagnosticKind::UnexpectedFailure);
        assert_eq!(diagnostic.lines, vec![DetailLine::Info("bye".to_string())]);
        assert!(diagnostic.message.contains("exit status: 3"));
    }
}
