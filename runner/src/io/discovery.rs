//! Source discovery: listings, on-disk scan and membership validation.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::manifest::{ListingEntry, is_source_file_name, module_segments, parse_listing};
use crate::core::membership::check_membership;
use crate::core::types::{Diagnostic, ModuleRole, SourceModule};
use crate::io::config::KoansConfig;

/// Absolute locations of everything the runner reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    /// Project root; diagnostics show paths relative to it.
    pub root: PathBuf,
    pub source_root: PathBuf,
    pub build_dir: PathBuf,
    pub helpers_list: PathBuf,
    pub exercises_list: PathBuf,
}

impl ProjectPaths {
    /// Resolve configured paths against the project root.
    ///
    /// The root and source directory are canonicalized so that paths recorded
    /// by the compiler can be compared against them.
    pub fn resolve(root: &Path, cfg: &KoansConfig) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve project root {}", root.display()))?;
        let source_dir = root.join(&cfg.source_dir);
        let source_root = source_dir
            .canonicalize()
            .with_context(|| format!("resolve source directory {}", source_dir.display()))?;
        if !source_root.is_dir() {
            bail!("source path {} is not a directory", source_root.display());
        }
        Ok(Self {
            build_dir: root.join(&cfg.build_dir),
            helpers_list: root.join(&cfg.helpers_list),
            exercises_list: root.join(&cfg.exercises_list),
            source_root,
            root,
        })
    }

    /// `path` relative to the project root, for display.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Validated helper and exercise modules, each in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub helpers: Vec<SourceModule>,
    pub exercises: Vec<SourceModule>,
}

/// Result of one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Valid(SourceSet),
    /// Listings and disk disagree; nothing may be compiled.
    Invalid(Diagnostic),
}

/// Read both listings, scan the source tree and validate membership.
///
/// Missing or unreadable listing files are errors, not diagnostics: there is
/// nothing for the learner to fix in a source file.
#[instrument(skip_all, fields(source_root = %paths.source_root.display()))]
pub fn discover(paths: &ProjectPaths) -> Result<Discovery> {
    let helpers = read_listing(&paths.helpers_list)?;
    let exercises = read_listing(&paths.exercises_list)?;
    let on_disk = scan_source_files(&paths.source_root, &paths.build_dir)?;
    debug!(
        helpers = helpers.len(),
        exercises = exercises.len(),
        on_disk = on_disk.len(),
        "discovered sources"
    );

    let report = check_membership(&helpers, &exercises, &on_disk);
    if !report.is_clean() {
        return Ok(Discovery::Invalid(report.to_diagnostic(
            &paths.display(&paths.helpers_list),
            &paths.display(&paths.exercises_list),
        )));
    }

    Ok(Discovery::Valid(SourceSet {
        helpers: to_modules(&paths.source_root, &helpers, ModuleRole::Helper)?,
        exercises: to_modules(&paths.source_root, &exercises, ModuleRole::Exercise)?,
    }))
}

fn read_listing(path: &Path) -> Result<Vec<ListingEntry>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read listing {}", path.display()))?;
    Ok(parse_listing(&contents))
}

fn to_modules(
    source_root: &Path,
    entries: &[ListingEntry],
    role: ModuleRole,
) -> Result<Vec<SourceModule>> {
    entries
        .iter()
        .map(|entry| {
            let segments = module_segments(&entry.path)
                .ok_or_else(|| anyhow!("invalid module path {}", entry.path))?;
            Ok(SourceModule {
                path: source_root.join(&entry.path),
                relative: entry.path.clone(),
                segments,
                role,
            })
        })
        .collect()
}

/// Eligible source files under `source_root`, as `/`-separated relative paths.
///
/// Hidden directories and the build directory (when nested in the source tree)
/// are not descended into.
pub fn scan_source_files(source_root: &Path, build_dir: &Path) -> Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    let walker = WalkDir::new(source_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            !hidden && entry.path() != build_dir
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", source_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_source_file_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.insert(parts.join("/"));
    }
    Ok(files)
}

/// Create the build directory if absent.
///
/// An existing non-directory at that path is an error.
pub fn ensure_build_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(anyhow!(
            "build path {} exists and is not a directory",
            path.display()
        )),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => fs::create_dir_all(path)
            .with_context(|| format!("create build directory {}", path.display())),
        Err(err) => Err(err).with_context(|| format!("inspect build directory {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DetailLine, DiagnosticKind};

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn project() -> (tempfile::TempDir, ProjectPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("koans")).expect("mkdir koans");
        let paths = ProjectPaths::resolve(temp.path(), &KoansConfig::default()).expect("paths");
        (temp, paths)
    }

    #[test]
    fn scan_ignores_hidden_and_non_source_files() {
        let (_temp, paths) = project();
        let root = &paths.source_root;
        write(root, "intro/basics.rs", "");
        write(root, "intro/.basics.rs", "");
        write(root, "intro/basics.rs~", "");
        write(root, ".cache/stale.rs", "");
        write(root, "notes.txt", "");
        write(root, "top.rs", "");

        let files = scan_source_files(root, &paths.build_dir).expect("scan");
        let files: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_eq!(files, vec!["intro/basics.rs", "top.rs"]);
    }

    #[test]
    fn discover_returns_modules_in_listing_order() {
        let (_temp, paths) = project();
        let root = &paths.source_root;
        write(root, "helpers.txt", "support/check.rs\n");
        write(root, "exercises.txt", "intro/second.rs\nintro/first.rs\n");
        write(root, "support/check.rs", "");
        write(root, "intro/first.rs", "");
        write(root, "intro/second.rs", "");

        let Discovery::Valid(set) = discover(&paths).expect("discover") else {
            panic!("expected valid discovery");
        };
        let names: Vec<String> = set.exercises.iter().map(SourceModule::name).collect();
        assert_eq!(names, vec!["intro::second", "intro::first"]);
        assert_eq!(set.helpers[0].name(), "support::check");
        assert_eq!(set.helpers[0].role, ModuleRole::Helper);
        assert_eq!(set.exercises[0].path, root.join("intro/second.rs"));
    }

    #[test]
    fn discover_reports_every_violation_at_once() {
        let (_temp, paths) = project();
        let root = &paths.source_root;
        write(root, "helpers.txt", "shared.rs\n");
        write(root, "exercises.txt", "shared.rs\nghost.rs\n");
        write(root, "shared.rs", "");
        write(root, "stray.rs", "");

        let Discovery::Invalid(diagnostic) = discover(&paths).expect("discover") else {
            panic!("expected invalid discovery");
        };
        assert_eq!(diagnostic.kind, DiagnosticKind::Validation);
        assert_eq!(diagnostic.subject, "koans/helpers.txt, koans/exercises.txt");
        assert_eq!(
            diagnostic.lines,
            vec![
                DetailLine::Error(
                    "koans/helpers.txt and koans/exercises.txt have common elements: {shared}"
                        .to_string()
                ),
                DetailLine::Error("Files missing on disk: {ghost.rs}".to_string()),
                DetailLine::Error(
                    "Files missing in koans/helpers.txt or koans/exercises.txt: {stray}".to_string()
                ),
            ]
        );
    }

    #[test]
    fn missing_listing_is_an_error() {
        let (_temp, paths) = project();
        write(&paths.source_root, "exercises.txt", "");
        let err = discover(&paths).expect_err("missing helpers listing");
        assert!(format!("{err:#}").contains("helpers.txt"));
    }

    #[test]
    fn ensure_build_dir_creates_and_rejects_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("build");
        ensure_build_dir(&dir).expect("create");
        assert!(dir.is_dir());
        ensure_build_dir(&dir).expect("existing dir is fine");

        let file = temp.path().join("not-a-dir");
        fs::write(&file, "x").expect("write");
        let err = ensure_build_dir(&file).expect_err("file rejected");
        assert!(err.to_string().contains("is not a directory"));
    }
}
