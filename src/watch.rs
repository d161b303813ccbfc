//! Filesystem notifications for shader and pipeline files.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use tracing::{info, warn};

/// Watches the directories of a set of files and reports when any of those
/// files is modified or recreated.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    files: BTreeSet<PathBuf>,
}

impl FileWatcher {
    pub fn new<'a>(files: impl IntoIterator<Item = &'a Path>) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default()).context("Failed to create file watcher")?;

        let files: BTreeSet<PathBuf> = files.into_iter().map(normalize).collect();
        let dirs: BTreeSet<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();
        // editors often replace files, so watch the directories instead
        for dir in &dirs {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!("Failed to watch {:?}: {}", dir, e);
            } else {
                info!("Watching {:?} for changes", dir);
            }
        }

        Ok(Self {
            _watcher: watcher,
            rx,
            files,
        })
    }

    fn is_relevant(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event.paths.iter().any(|p| self.files.contains(&normalize(p)))
    }

    /// Drains pending events; true if a watched file changed.
    pub fn check_for_changes(&self) -> bool {
        let mut changed = false;
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) => changed |= self.is_relevant(&event),
                Err(e) => warn!("Watch error: {}", e),
            }
        }
        changed
    }

    /// Blocks until a watched file changes or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => self.is_relevant(&event) | self.check_for_changes(),
            Ok(Err(e)) => {
                warn!("Watch error: {}", e);
                false
            }
            Err(_) => false,
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_unrelated_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("a.glsl");
        fs::write(&watched, "x").unwrap();
        let watcher = FileWatcher::new([watched.as_path()]).unwrap();

        let other = Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(dir.path().join("b.glsl"));
        assert!(!watcher.is_relevant(&other));

        let ours = Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(watched.clone());
        assert!(watcher.is_relevant(&ours));

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File)).add_path(watched);
        assert!(!watcher.is_relevant(&removed));
    }
}
