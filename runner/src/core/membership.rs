//! Listing-versus-disk membership checks.
//!
//! The helper and exercise listings must be disjoint, every listed entry must
//! exist on disk, and every eligible file on disk must be listed. All violations
//! are collected so the learner sees every problem in one report.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::manifest::{ListingEntry, module_segments};
use crate::core::types::{DetailLine, Diagnostic, DiagnosticKind};

/// Violations found while comparing listings with the files on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipReport {
    /// Modules declared in both listings.
    pub overlap: BTreeSet<String>,
    /// Listed paths with no file on disk.
    pub missing: BTreeSet<String>,
    /// Eligible files on disk that neither listing declares.
    pub undeclared: BTreeSet<String>,
    /// Entries that are not usable module paths, with the reason.
    pub invalid: Vec<String>,
}

impl MembershipReport {
    pub fn is_clean(&self) -> bool {
        self.overlap.is_empty()
            && self.missing.is_empty()
            && self.undeclared.is_empty()
            && self.invalid.is_empty()
    }

    /// Render the violations as one validation diagnostic.
    pub fn to_diagnostic(&self, helpers_label: &str, exercises_label: &str) -> Diagnostic {
        let mut lines = Vec::new();
        if !self.overlap.is_empty() {
            lines.push(DetailLine::Error(format!(
                "{helpers_label} and {exercises_label} have common elements: {}",
                format_set(&self.overlap)
            )));
        }
        if !self.missing.is_empty() {
            lines.push(DetailLine::Error(format!(
                "Files missing on disk: {}",
                format_set(&self.missing)
            )));
        }
        if !self.undeclared.is_empty() {
            lines.push(DetailLine::Error(format!(
                "Files missing in {helpers_label} or {exercises_label}: {}",
                format_set(&self.undeclared)
            )));
        }
        for reason in &self.invalid {
            lines.push(DetailLine::Error(reason.clone()));
        }
        Diagnostic::new(
            DiagnosticKind::Validation,
            format!("{helpers_label}, {exercises_label}"),
            "module listings do not match the source files on disk",
        )
        .with_lines(lines)
    }
}

/// Compare both listings against the eligible files found on disk.
///
/// `on_disk` holds paths relative to the source root, `/`-separated.
pub fn check_membership(
    helpers: &[ListingEntry],
    exercises: &[ListingEntry],
    on_disk: &BTreeSet<String>,
) -> MembershipReport {
    let mut report = MembershipReport::default();

    let helper_paths: BTreeSet<&str> = helpers.iter().map(|e| e.path.as_str()).collect();
    let exercise_paths: BTreeSet<&str> = exercises.iter().map(|e| e.path.as_str()).collect();

    for path in helper_paths.intersection(&exercise_paths) {
        report.overlap.insert(display_name(path));
    }

    for path in helper_paths.union(&exercise_paths) {
        if !on_disk.contains(*path) {
            report.missing.insert((*path).to_string());
        }
    }

    for path in on_disk {
        if !helper_paths.contains(path.as_str()) && !exercise_paths.contains(path.as_str()) {
            report.undeclared.insert(display_name(path));
        }
    }

    check_entries("helper", helpers, &mut report.invalid);
    check_entries("exercise", exercises, &mut report.invalid);
    check_crate_names(helpers, exercises, &mut report.invalid);
    check_helper_namespaces(helpers, &mut report.invalid);

    report
}

fn check_entries(label: &str, entries: &[ListingEntry], invalid: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    for entry in entries {
        if module_segments(&entry.path).is_none() {
            invalid.push(format!(
                "{label} entry '{}' (line {}) is not a module path: expected identifier segments ending in .rs",
                entry.path, entry.line
            ));
        }
        if !seen.insert(entry.path.as_str()) {
            invalid.push(format!(
                "{label} entry '{}' (line {}) is listed more than once",
                entry.path, entry.line
            ));
        }
    }
}

/// Distinct exercise paths must not collapse onto one compiled crate name.
fn check_crate_names(helpers: &[ListingEntry], exercises: &[ListingEntry], invalid: &mut Vec<String>) {
    let helper_paths: BTreeSet<&str> = helpers.iter().map(|e| e.path.as_str()).collect();
    let mut by_crate: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for entry in exercises {
        if helper_paths.contains(entry.path.as_str()) {
            continue;
        }
        if let Some(segments) = module_segments(&entry.path) {
            by_crate
                .entry(segments.join("_"))
                .or_default()
                .insert(entry.path.as_str());
        }
    }
    for paths in by_crate.values().filter(|paths| paths.len() > 1) {
        let joined: Vec<&str> = paths.iter().copied().collect();
        invalid.push(format!(
            "exercise entries {} would compile to the same crate name",
            joined.join(", ")
        ));
    }
}

/// Helpers share one crate, so a helper file cannot also be a namespace directory.
fn check_helper_namespaces(helpers: &[ListingEntry], invalid: &mut Vec<String>) {
    let modules: BTreeSet<Vec<String>> = helpers
        .iter()
        .filter_map(|entry| module_segments(&entry.path))
        .collect();
    for segments in &modules {
        for depth in 1..segments.len() {
            let prefix = &segments[..depth];
            if modules.contains(prefix) {
                invalid.push(format!(
                    "helper module {} is also the namespace of helper {}",
                    prefix.join("::"),
                    segments.join("::")
                ));
            }
        }
    }
}

/// Module name for a relative path, falling back to the path itself.
fn display_name(path: &str) -> String {
    module_segments(path)
        .map(|segments| segments.join("::"))
        .unwrap_or_else(|| path.to_string())
}

fn format_set(set: &BTreeSet<String>) -> String {
    let items: Vec<&str> = set.iter().map(String::as_str).collect();
    format!("{{{}}}", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::parse_listing;

    fn disk(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn clean_when_listings_match_disk() {
        let helpers = parse_listing("support/check.rs\n");
        let exercises = parse_listing("intro/basics.rs\ndecl/locals.rs\n");
        let report = check_membership(
            &helpers,
            &exercises,
            &disk(&["support/check.rs", "intro/basics.rs", "decl/locals.rs"]),
        );
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn overlap_names_the_shared_module() {
        let helpers = parse_listing("H.rs\n");
        let exercises = parse_listing("H.rs\n");
        let report = check_membership(&helpers, &exercises, &disk(&["H.rs"]));
        assert_eq!(report.overlap, BTreeSet::from(["H".to_string()]));
        assert!(report.missing.is_empty());
        assert!(report.undeclared.is_empty());

        let diagnostic = report.to_diagnostic("helpers.txt", "exercises.txt");
        assert_eq!(diagnostic.kind, DiagnosticKind::Validation);
        assert_eq!(
            diagnostic.lines,
            vec![DetailLine::Error(
                "helpers.txt and exercises.txt have common elements: {H}".to_string()
            )]
        );
    }

    #[test]
    fn undeclared_file_on_disk_is_reported() {
        let exercises = parse_listing("intro/basics.rs\n");
        let report = check_membership(&[], &exercises, &disk(&["intro/basics.rs", "Extra.rs"]));
        assert_eq!(report.undeclared, BTreeSet::from(["Extra".to_string()]));
        assert!(!report.is_clean());
    }

    #[test]
    fn listed_but_missing_file_is_reported() {
        let exercises = parse_listing("intro/basics.rs\nintro/gone.rs\n");
        let report = check_membership(&[], &exercises, &disk(&["intro/basics.rs"]));
        assert_eq!(report.missing, BTreeSet::from(["intro/gone.rs".to_string()]));
    }

    #[test]
    fn invalid_and_duplicate_entries_are_reported() {
        let exercises = parse_listing("intro/basics.rs\nintro/basics.rs\nbad-name.rs\n");
        let report = check_membership(
            &[],
            &exercises,
            &disk(&["intro/basics.rs", "bad-name.rs"]),
        );
        assert_eq!(report.invalid.len(), 2);
        assert!(report.invalid[0].contains("listed more than once"));
        assert!(report.invalid[1].contains("bad-name.rs"));
    }

    #[test]
    fn colliding_crate_names_are_reported() {
        let exercises = parse_listing("intro/basics.rs\nintro_basics.rs\n");
        let report = check_membership(
            &[],
            &exercises,
            &disk(&["intro/basics.rs", "intro_basics.rs"]),
        );
        assert_eq!(report.invalid.len(), 1);
        assert!(report.invalid[0].contains("same crate name"));
    }

    #[test]
    fn helper_file_cannot_shadow_helper_namespace() {
        let helpers = parse_listing("support.rs\nsupport/check.rs\n");
        let report = check_membership(
            &helpers,
            &[],
            &disk(&["support.rs", "support/check.rs"]),
        );
        assert_eq!(
            report.invalid,
            vec!["helper module support is also the namespace of helper support::check".to_string()]
        );
    }
}
