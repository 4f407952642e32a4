//! Listing parsing and module path rules.
//!
//! A listing declares one module per line as a path relative to the source root
//! (`intro/basics.rs`). `#` starts a comment that runs to the end of the line;
//! blank lines are ignored.

use std::sync::LazyLock;

use regex::Regex;

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("segment regex"));

const SOURCE_EXTENSION: &str = ".rs";

/// Keywords that cannot name a module without raw-identifier syntax.
const KEYWORDS: &[&str] = &[
    "Self", "abstract", "as", "async", "await", "become", "box", "break", "const", "continue",
    "crate", "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if",
    "impl", "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv",
    "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// One non-blank listing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// 1-based line number in the listing file.
    pub line: usize,
    pub path: String,
}

/// Parse listing text into entries, in declaration order.
pub fn parse_listing(contents: &str) -> Vec<ListingEntry> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let without_comment = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let path = without_comment.trim();
            if path.is_empty() {
                return None;
            }
            Some(ListingEntry {
                line: idx + 1,
                path: path.replace('\\', "/"),
            })
        })
        .collect()
}

/// True if a file name is eligible source: ends in `.rs` and is not hidden.
///
/// Editor swap and backup files (`.basics.rs.swp`, `basics.rs~`) never match.
pub fn is_source_file_name(name: &str) -> bool {
    name.ends_with(SOURCE_EXTENSION) && !name.starts_with('.')
}

/// Split a relative module path into namespace segments.
///
/// Returns `None` unless the path is a `.rs` file whose every segment is a plain
/// Rust identifier (`intro/basics.rs` -> `["intro", "basics"]`).
pub fn module_segments(relative: &str) -> Option<Vec<String>> {
    let stem = relative.strip_suffix(SOURCE_EXTENSION)?;
    let segments: Vec<String> = stem.split('/').map(str::to_string).collect();
    if segments
        .iter()
        .all(|segment| {
            SEGMENT_RE.is_match(segment) && segment != "_" && !KEYWORDS.contains(&segment.as_str())
        })
    {
        Some(segments)
    } else {
        None
    }
}
