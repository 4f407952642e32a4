//! Blocking wait for learner edits.
//!
//! The [`ChangeWaiter`] trait decouples the retry loop from the filesystem.
//! Tests use scripted waiters that edit sources instead of waiting.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, channel};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use notify::{
    Config, Event as NotifyEvent, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode,
    Watcher,
};
use tracing::{debug, info, instrument, trace};
use walkdir::WalkDir;

use crate::core::manifest::is_source_file_name;
use crate::io::config::KoansConfig;
use crate::io::discovery::ProjectPaths;

/// Abstraction over "block until the learner changes something".
pub trait ChangeWaiter {
    /// Return once a relevant change has been observed. No timeout.
    fn wait_for_change(&mut self) -> Result<()>;
}

/// Waiter backed by filesystem notifications on the source tree.
pub struct SourceWatcher {
    watcher: Box<dyn Watcher + Send>,
    rx: Receiver<notify::Result<NotifyEvent>>,
    source_root: PathBuf,
    build_dir: PathBuf,
    listing_files: Vec<PathBuf>,
    watched: BTreeSet<PathBuf>,
    settle_delay: Duration,
}

impl SourceWatcher {
    /// Create a watcher over every directory under the source root.
    ///
    /// Uses native notifications unless `watch.poll_interval_ms` is set.
    #[instrument(skip_all, fields(source_root = %paths.source_root.display()))]
    pub fn new(paths: &ProjectPaths, cfg: &KoansConfig) -> Result<Self> {
        let (tx, rx) = channel();
        let watcher: Box<dyn Watcher + Send> = match cfg.watch.poll_interval_ms {
            Some(ms) => Box::new(
                PollWatcher::new(
                    tx,
                    Config::default().with_poll_interval(Duration::from_millis(ms)),
                )
                .context("create polling watcher")?,
            ),
            None => Box::new(
                RecommendedWatcher::new(tx, Config::default()).context("create file watcher")?,
            ),
        };
        let mut this = Self {
            watcher,
            rx,
            source_root: paths.source_root.clone(),
            build_dir: paths.build_dir.clone(),
            listing_files: vec![paths.helpers_list.clone(), paths.exercises_list.clone()],
            watched: BTreeSet::new(),
            settle_delay: cfg.settle_delay(),
        };
        this.register_directories()?;
        Ok(this)
    }

    /// Register directories not yet watched: the source tree plus the
    /// directories holding the listings.
    fn register_directories(&mut self) -> Result<()> {
        // Deleted directories lose their watch; forget them so a re-created one is registered.
        self.watched.retain(|dir| dir.is_dir());
        let mut dirs = Vec::new();
        for entry in WalkDir::new(&self.source_root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || (entry.file_type().is_dir()
                        && !entry.file_name().to_string_lossy().starts_with('.')
                        && entry.path() != self.build_dir)
            })
        {
            let entry = entry.with_context(|| format!("walk {}", self.source_root.display()))?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            }
        }
        for listing in &self.listing_files {
            if let Some(parent) = listing.parent()
                && parent.is_dir()
            {
                dirs.push(parent.to_path_buf());
            }
        }

        for dir in dirs {
            if self.watched.contains(&dir) {
                continue;
            }
            self.watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("watch {}", dir.display()))?;
            debug!(dir = %dir.display(), "watching directory");
            self.watched.insert(dir);
        }
        Ok(())
    }

    /// Consume queued events, returning whether any was relevant.
    fn drain(&self) -> Result<bool> {
        let mut relevant = false;
        while let Ok(event) = self.rx.try_recv() {
            relevant |= self.is_relevant(&event?);
        }
        Ok(relevant)
    }

    fn is_relevant(&self, event: &NotifyEvent) -> bool {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return false;
        }
        event
            .paths
            .iter()
            .any(|path| is_relevant_path(path, &self.listing_files))
    }
}

impl ChangeWaiter for SourceWatcher {
    fn wait_for_change(&mut self) -> Result<()> {
        self.register_directories()?;
        // Events caused by the cycle that just ended (or earlier edits) are stale.
        self.drain()?;
        loop {
            let first = self
                .rx
                .recv()
                .map_err(|_| anyhow!("file watcher stopped unexpectedly"))?
                .context("file watcher error")?;
            let mut relevant = self.is_relevant(&first);
            thread::sleep(self.settle_delay);
            relevant |= self.drain()?;
            if relevant {
                info!("source change detected");
                return Ok(());
            }
            trace!(paths = ?first.paths, "ignoring irrelevant change");
            // New directories may have appeared in the meantime.
            self.register_directories()?;
        }
    }
}

/// An eligible source file or one of the listing files.
pub fn is_relevant_path(path: &Path, listing_files: &[PathBuf]) -> bool {
    if listing_files.iter().any(|listing| listing == path) {
        return true;
    }
    path.file_name()
        .is_some_and(|name| is_source_file_name(&name.to_string_lossy()))
}
