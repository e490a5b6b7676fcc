//! Filesystem observation for a single run.
//!
//! Sizes of every watch root are snapshotted before the run and recomputed
//! afterwards. While the run is in progress, notifications from one watcher per
//! root are funneled through a bounded channel into a single consumer thread
//! that owns the [`OperationLog`], so the log itself needs no locking.

use crate::model::{FileOperation, OperationKind, SizedFile, StorageMetrics};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use walkdir::WalkDir;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
pub const DEFAULT_LARGEST_FILES: usize = 10;
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub debounce: Duration,
    pub largest_files: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            largest_files: DEFAULT_LARGEST_FILES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub label: String,
    pub path: PathBuf,
    canonical: Option<PathBuf>,
}

impl WatchRoot {
    pub fn new(base_dir: &Path, label: &str) -> Self {
        let label = label.trim_end_matches('/').to_string();
        Self {
            path: base_dir.join(&label),
            label,
            canonical: None,
        }
    }

    /// Path of `path` relative to the base directory, always starting with
    /// this root's label. `None` when the path is outside the root.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let inner = path
            .strip_prefix(&self.path)
            .ok()
            .or_else(|| {
                self.canonical
                    .as_deref()
                    .and_then(|canonical| path.strip_prefix(canonical).ok())
            })?;

        let mut parts = Vec::new();
        for component in inner.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }

        if parts.is_empty() {
            return None;
        }

        Some(format!("{}/{}", self.label, parts.join("/")))
    }
}

/// Notification kind as delivered by the watcher, before re-stating the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    Create,
    Modify,
    Rename,
    Remove,
    Other,
}

impl RawKind {
    /// `None` for access-only notifications, which never mutate anything.
    pub fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) => Some(RawKind::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(RawKind::Rename),
            EventKind::Modify(_) => Some(RawKind::Modify),
            EventKind::Remove(_) => Some(RawKind::Remove),
            EventKind::Any | EventKind::Other => Some(RawKind::Other),
        }
    }

    fn announces_new_path(self) -> bool {
        matches!(self, RawKind::Create | RawKind::Rename)
    }
}

#[derive(Debug)]
pub struct OperationLog {
    debounce: Duration,
    recent: HashMap<(RawKind, PathBuf), Instant>,
    operations: Vec<FileOperation>,
}

impl OperationLog {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            recent: HashMap::new(),
            operations: Vec::new(),
        }
    }

    /// Classifies one notification and appends it unless an identical
    /// `(kind, path)` pair was recorded less than one debounce window ago.
    pub fn record(
        &mut self,
        root: &WatchRoot,
        kind: RawKind,
        path: &Path,
        at: Instant,
    ) -> Option<&FileOperation> {
        let window = self.debounce;
        self.recent
            .retain(|_, seen| at.saturating_duration_since(*seen) < window);

        let key = (kind, path.to_path_buf());
        if self.recent.contains_key(&key) {
            return None;
        }
        self.recent.insert(key, at);

        let Some(relative_path) = root.relative(path) else {
            tracing::debug!(path = %path.display(), root = %root.label, "event outside watch root");
            return None;
        };

        let (op_kind, size) = match fs::metadata(path) {
            Err(_) => (OperationKind::Deleted, 0),
            Ok(meta) if meta.is_dir() => return None,
            Ok(meta) if kind.announces_new_path() => (OperationKind::Created, meta.len()),
            Ok(meta) => (OperationKind::Modified, meta.len()),
        };

        self.operations.push(FileOperation {
            kind: op_kind,
            path: path.to_path_buf(),
            relative_path,
            timestamp: OffsetDateTime::now_utc(),
            size,
        });
        self.operations.last()
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }
}

#[derive(Debug)]
struct RawEvent {
    root: usize,
    kind: RawKind,
    path: PathBuf,
}

#[derive(Debug)]
enum Signal {
    Event(RawEvent),
    Stop,
}

pub struct ChangeTracker {
    roots: Vec<WatchRoot>,
    settings: TrackerSettings,
    initial_sizes: BTreeMap<String, u64>,
    watchers: Vec<RecommendedWatcher>,
    control: Option<SyncSender<Signal>>,
    consumer: Option<JoinHandle<OperationLog>>,
    log: OperationLog,
}

impl ChangeTracker {
    pub fn new(base_dir: &Path, labels: &[String], settings: TrackerSettings) -> Self {
        Self {
            roots: labels
                .iter()
                .map(|label| WatchRoot::new(base_dir, label))
                .collect(),
            settings,
            initial_sizes: BTreeMap::new(),
            watchers: Vec::new(),
            control: None,
            consumer: None,
            log: OperationLog::new(settings.debounce),
        }
    }

    pub fn snapshot(&mut self) {
        for root in &self.roots {
            let size = directory_size(&root.path);
            tracing::debug!(root = %root.label, size, "snapshot");
            self.initial_sizes.insert(root.label.clone(), size);
        }
    }

    pub fn initial_size(&self, label: &str) -> u64 {
        self.initial_sizes.get(label).copied().unwrap_or(0)
    }

    /// Attaches a recursive watcher to every root, creating missing roots
    /// first. Roots that cannot be watched are skipped with a warning.
    pub fn watch(&mut self) {
        if self.consumer.is_some() {
            return;
        }

        for root in &mut self.roots {
            if let Err(err) = fs::create_dir_all(&root.path) {
                tracing::warn!(root = %root.label, error = %err, "could not create watch root");
                continue;
            }
            root.canonical = fs::canonicalize(&root.path).ok();
        }

        let (tx, rx) = mpsc::sync_channel::<Signal>(QUEUE_CAPACITY);

        for (index, root) in self.roots.iter().enumerate() {
            let events = tx.clone();
            let handler = move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let Some(kind) = RawKind::from_event(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        let raw = RawEvent {
                            root: index,
                            kind,
                            path,
                        };
                        if events.send(Signal::Event(raw)).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => tracing::debug!(error = %err, "watch error"),
            };

            let attached = notify::recommended_watcher(handler).and_then(|mut watcher| {
                watcher.watch(&root.path, RecursiveMode::Recursive)?;
                Ok(watcher)
            });

            match attached {
                Ok(watcher) => self.watchers.push(watcher),
                Err(err) => {
                    tracing::warn!(root = %root.path.display(), error = %err, "could not watch directory");
                }
            }
        }

        let roots = self.roots.clone();
        let mut log = std::mem::replace(&mut self.log, OperationLog::new(self.settings.debounce));
        self.consumer = Some(thread::spawn(move || {
            for signal in rx {
                match signal {
                    Signal::Event(raw) => {
                        if let Some(root) = roots.get(raw.root) {
                            log.record(root, raw.kind, &raw.path, Instant::now());
                        }
                    }
                    Signal::Stop => break,
                }
            }
            log
        }));
        self.control = Some(tx);
    }

    pub fn is_watching(&self) -> bool {
        self.consumer.is_some()
    }

    /// Feeds one notification directly into the log. Only meaningful while
    /// not watching; during a watch the consumer thread owns the log.
    pub fn handle_event(&mut self, root: usize, kind: RawKind, path: &Path) -> Option<FileOperation> {
        let root = self.roots.get(root)?;
        self.log.record(root, kind, path, Instant::now()).cloned()
    }

    /// Detaches all watchers and waits for queued notifications to be
    /// recorded. Events the platform has not yet delivered are dropped, so
    /// callers that want trailing writes logged wait before stopping. Safe to
    /// call repeatedly.
    pub fn stop(&mut self) {
        self.watchers.clear();

        if let Some(control) = self.control.take() {
            let _ = control.send(Signal::Stop);
        }

        if let Some(consumer) = self.consumer.take() {
            match consumer.join() {
                Ok(log) => self.log = log,
                Err(_) => tracing::warn!("file event consumer panicked; operations lost"),
            }
        }
    }

    pub fn operations(&self) -> &[FileOperation] {
        self.log.operations()
    }

    pub fn metrics(&self) -> StorageMetrics {
        let mut by_directory = BTreeMap::new();
        let mut total_bytes_added = 0;

        for root in &self.roots {
            let current = directory_size(&root.path);
            let added = current.saturating_sub(self.initial_size(&root.label));
            by_directory.insert(root.label.clone(), added);
            total_bytes_added += added;
        }

        let total_bytes_modified = self
            .operations()
            .iter()
            .filter(|op| op.kind == OperationKind::Modified && op.size > 0)
            .map(|op| op.size)
            .sum();

        StorageMetrics {
            total_bytes_added,
            total_bytes_modified,
            by_directory,
            largest_files: largest_created(self.operations(), self.settings.largest_files),
        }
    }
}

impl Drop for ChangeTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Created operations with a nonzero size, largest first.
pub fn largest_created(operations: &[FileOperation], limit: usize) -> Vec<SizedFile> {
    let mut files: Vec<SizedFile> = operations
        .iter()
        .filter(|op| op.kind == OperationKind::Created && op.size > 0)
        .map(|op| SizedFile {
            path: op.relative_path.clone(),
            size: op.size,
        })
        .collect();

    files.sort_by(|a, b| b.size.cmp(&a.size));
    files.truncate(limit);
    files
}

/// Sum of regular-file sizes below `path`; 0 when it does not exist.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.metadata().map(|m| m.len()).unwrap_or(0))
        .sum()
}
