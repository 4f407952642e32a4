//! Classification of captured compiler output.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::DetailLine;

/// Hard-error marker in rustc's human-readable output (`error:` / `error[E0308]:`).
static HARD_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^error(?:\[E\d+\])?:").expect("hard error regex"));

pub fn is_hard_error(line: &str) -> bool {
    HARD_ERROR_RE.is_match(line)
}

/// Split compiler output into hard-error and informational lines.
///
/// Trailing blank lines are dropped; blank lines inside the output are kept so
/// the compiler's own grouping survives.
pub fn classify_lines(output: &str) -> Vec<DetailLine> {
    let mut lines: Vec<DetailLine> = output
        .lines()
        .map(|line| {
            if is_hard_error(line) {
                DetailLine::Error(line.to_string())
            } else {
                DetailLine::Info(line.to_string())
            }
        })
        .collect();
    while matches!(lines.last(), Some(DetailLine::Info(text)) if text.trim().is_empty()) {
        lines.pop();
    }
    lines
}
