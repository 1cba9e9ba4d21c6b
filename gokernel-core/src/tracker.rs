//! File-change tracker (C5): watches declared local dependency directories
//! and the module manifest, feeding the language-server supervisor with
//! paths that changed.
//!
//! Adapted from the notebook runner's own file watcher
//! (`notify` + `notify_debouncer_mini`), generalized from "rebuild the
//! dylib on any `.rs` change" to "track an open-ended set of files and
//! directories, filtered to build-relevant extensions, and report a
//! deterministic drain of what changed".

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::Result;

type NotifyDebouncer = Debouncer<notify::RecommendedWatcher>;

/// Files whose extension/name makes them build-relevant; everything else
/// (including `_test.go` files) is filtered out before being enqueued.
fn is_build_relevant(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.ends_with("_test.go") => false,
        Some("go.mod") | Some("go.sum") | Some("go.work") | Some("go.work.sum") => true,
        _ => path.extension().and_then(|e| e.to_str()) == Some("go"),
    }
}

struct TrackerState {
    tracked: HashSet<PathBuf>,
    updated: HashSet<PathBuf>,
}

/// Guards both the tracked-files set and the updated-files set with a
/// single mutex; the watcher task only appends to `updated`.
pub struct FileTracker {
    state: Arc<Mutex<TrackerState>>,
    _debouncer: Option<NotifyDebouncer>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl FileTracker {
    pub fn new() -> Result<Self> {
        let state = Arc::new(Mutex::new(TrackerState { tracked: HashSet::new(), updated: HashSet::new() }));
        let state_for_watcher = state.clone();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PathBuf>();

        let debouncer = new_debouncer(Duration::from_millis(250), move |result: DebounceEventResult| {
            if let Ok(events) = result {
                for event in events {
                    let _ = event_tx.send(event.path);
                }
            }
        })
        .ok();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    maybe_path = event_rx.recv() => {
                        let Some(path) = maybe_path else { break };
                        if is_build_relevant(&path) {
                            let mut guard = state_for_watcher.lock();
                            guard.updated.insert(path);
                        }
                    }
                }
            }
        });

        Ok(Self { state, _debouncer: debouncer, shutdown_tx: Some(shutdown_tx) })
    }

    /// Resolve symlinks (with cycle detection) and add `path` to the
    /// tracked set, registering it with the watcher. Directories are
    /// watched non-recursively — each subdirectory containing source files
    /// must be registered individually, since the notification facility
    /// does not recurse.
    pub fn track(&mut self, path: &Path) -> Result<()> {
        let resolved = resolve_symlink(path, &mut HashSet::new())?;
        {
            let mut guard = self.state.lock();
            guard.tracked.insert(resolved.clone());
        }
        if let Some(debouncer) = &mut self._debouncer {
            let _ = debouncer.watcher().watch(&resolved, notify::RecursiveMode::NonRecursive);
        }
        Ok(())
    }

    /// Untrack `path`; if `prefix` is true, untrack every tracked entry
    /// that starts with `path` (the `untrack PATH...` directive form).
    pub fn untrack(&mut self, path: &Path, prefix: bool) {
        let mut guard = self.state.lock();
        if prefix {
            guard.tracked.retain(|p| !p.starts_with(path));
        } else {
            guard.tracked.remove(path);
        }
        if let Some(debouncer) = &mut self._debouncer {
            let _ = debouncer.watcher().unwatch(path);
        }
        if guard.tracked.is_empty() {
            drop(guard);
            self.teardown();
        }
    }

    /// Drain the pending updated set under the shared lock and call `f`
    /// for each path in deterministic (sorted) order.
    pub fn enumerate_updated(&self, mut f: impl FnMut(&Path)) {
        let mut guard = self.state.lock();
        let mut paths: Vec<PathBuf> = guard.updated.drain().collect();
        paths.sort();
        drop(guard);
        for path in &paths {
            f(path);
        }
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.lock().tracked.iter().cloned().collect();
        paths.sort();
        paths
    }

    fn teardown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        self._debouncer = None;
    }

    /// Re-scan `go.mod` (and `go.work`, if present) for `replace` directives
    /// pointing at local directories, auto-tracking each such directory and
    /// recursively the subdirectories that themselves contain `.go` files.
    pub fn rescan_manifests(&mut self, go_mod: &Path, go_work: Option<&Path>) -> Result<()> {
        for manifest in [Some(go_mod), go_work].into_iter().flatten() {
            if let Ok(text) = std::fs::read_to_string(manifest) {
                for dir in local_replace_targets(&text) {
                    self.track_recursive(&dir)?;
                }
            }
        }
        Ok(())
    }

    fn track_recursive(&mut self, root: &Path) -> Result<()> {
        if !root.is_dir() {
            return Ok(());
        }
        self.track(root)?;
        for entry in std::fs::read_dir(root)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.track_recursive(&path)?;
            }
        }
        Ok(())
    }
}

/// Extract local filesystem targets from `replace <mod> => <path>` lines
/// where `<path>` begins with `.` or `/` (a local replace rather than a
/// version pin).
fn local_replace_targets(manifest_text: &str) -> Vec<PathBuf> {
    let mut targets = Vec::new();
    for line in manifest_text.lines() {
        let line = line.trim();
        let Some(arrow) = line.find("=>") else { continue };
        if !line.starts_with("replace") && !line.trim_start().starts_with(char::is_alphanumeric) {
            continue;
        }
        let target = line[arrow + 2..].trim();
        let target = target.split_whitespace().next().unwrap_or("");
        if target.starts_with('.') || target.starts_with('/') {
            targets.push(PathBuf::from(target));
        }
    }
    targets
}

fn resolve_symlink(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<PathBuf> {
    if !seen.insert(path.to_path_buf()) {
        return Ok(path.to_path_buf()); // cycle: stop following, report as-is.
    }
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let target = std::fs::read_link(path)?;
            let resolved = if target.is_absolute() { target } else { path.parent().unwrap_or(Path::new(".")).join(target) };
            resolve_symlink(&resolved, seen)
        }
        _ => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_test_only_go_files() {
        assert!(!is_build_relevant(Path::new("foo_test.go")));
        assert!(is_build_relevant(Path::new("foo.go")));
        assert!(is_build_relevant(Path::new("go.mod")));
        assert!(!is_build_relevant(Path::new("readme.md")));
    }

    #[test]
    fn parses_local_replace_targets() {
        let manifest = "module m\n\ngo 1.22\n\nrequire foo v1.0.0\n\nreplace foo => ../foo\nreplace bar => v1.2.3\n";
        let targets = local_replace_targets(manifest);
        assert_eq!(targets, vec![PathBuf::from("../foo")]);
    }

    #[tokio::test]
    async fn enumerate_updated_drains_in_sorted_order() {
        let tracker = FileTracker::new().unwrap();
        {
            let mut guard = tracker.state.lock();
            guard.updated.insert(PathBuf::from("/tmp/b.go"));
            guard.updated.insert(PathBuf::from("/tmp/a.go"));
        }
        let mut seen = Vec::new();
        tracker.enumerate_updated(|p| seen.push(p.to_path_buf()));
        assert_eq!(seen, vec![PathBuf::from("/tmp/a.go"), PathBuf::from("/tmp/b.go")]);

        let mut seen2 = Vec::new();
        tracker.enumerate_updated(|p| seen2.push(p.to_path_buf()));
        assert!(seen2.is_empty(), "drain must empty the pending set");
    }
}
