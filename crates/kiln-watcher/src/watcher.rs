//! Filesystem watcher implementation

use anyhow::Result;
use kiln_core::FileId;
use kiln_runner::Runner;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Quiet period that closes a batch of changes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(path) | WatchEvent::Modified(path) | WatchEvent::Removed(path) => path,
        }
    }
}

/// File system watcher for a project directory
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    root_path: PathBuf,
}

impl FileWatcher {
    /// Create a new file watcher for the given root path
    pub fn new(root_path: impl AsRef<Path>) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let notify_tx = event_tx.clone();
        let notify_root = root_path.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                debug!(kind = ?event.kind, paths = ?event.paths, "file system event");
                Self::handle_notify_event(&notify_root, event, &notify_tx);
            }
            Err(e) => {
                error!("File system watch error: {}", e);
            }
        })?;

        Ok(Self {
            watcher,
            event_tx,
            event_rx,
            root_path,
        })
    }

    /// Convert a notify event into watch events
    fn handle_notify_event(
        root: &Path,
        event: notify::Event,
        event_tx: &mpsc::UnboundedSender<WatchEvent>,
    ) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            if should_ignore_path(root, &path) {
                continue;
            }
            if let Err(e) = event_tx.send(make(path)) {
                warn!("Failed to forward watch event: {}", e);
            }
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Watch a directory recursively
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {}", path.display());

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        Ok(())
    }

    /// Sender feeding the same queue as the OS watcher, for synthetic events
    pub fn sender(&self) -> mpsc::UnboundedSender<WatchEvent> {
        self.event_tx.clone()
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }
}

/// Turns bursts of file events into dirty graph files
pub struct WatcherService {
    watcher: FileWatcher,
    runner: Runner,
    debounce: Duration,
}

impl WatcherService {
    /// Create a watcher service over the runner's root
    pub fn new(runner: Runner) -> Result<Self> {
        let watcher = FileWatcher::new(runner.root())?;
        Ok(Self {
            watcher,
            runner,
            debounce: DEFAULT_DEBOUNCE,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    /// Start watching the project directory
    pub fn start_watching(&mut self) -> Result<()> {
        let root_path = self.watcher.root_path().to_path_buf();
        self.watcher.watch_directory(&root_path)?;
        info!("Started watching project directory: {}", root_path.display());
        Ok(())
    }

    /// Wait for the next burst of changes.
    ///
    /// Every changed path that belongs to a graph file marks that file dirty;
    /// the batch holds each such file once. Paths unknown to the graph are
    /// skipped, so a batch can be empty. Returns `None` once the event
    /// stream has closed.
    pub async fn next_batch(&mut self) -> Option<Vec<FileId>> {
        let debounce = self.debounce;
        let event_rx = self.watcher.event_receiver();
        let mut events = vec![event_rx.recv().await?];

        let quiet = tokio::time::sleep(debounce);
        tokio::pin!(quiet);
        loop {
            tokio::select! {
                _ = &mut quiet => break,
                event = event_rx.recv() => match event {
                    Some(event) => events.push(event),
                    None => break,
                },
            }
        }

        let mut changed = Vec::new();
        for event in &events {
            if let Some(id) = self.handle_event(event) {
                if !changed.contains(&id) {
                    changed.push(id);
                }
            }
        }
        debug!(events = events.len(), changed = changed.len(), "watch batch collected");
        Some(changed)
    }

    /// Dirty the graph file an event refers to, if there is one.
    fn handle_event(&self, event: &WatchEvent) -> Option<FileId> {
        let path = match event {
            WatchEvent::Created(path) | WatchEvent::Modified(path) => path,
            WatchEvent::Removed(path) => {
                debug!("File removed, leaving graph untouched: {}", path.display());
                return None;
            }
        };

        let graph = self.runner.graph();
        let mut graph = graph.write();
        let Some(id) = graph.find_file(path).map(|file| file.id()) else {
            debug!("File not in the build graph: {}", path.display());
            return None;
        };
        if let Err(e) = graph.dirty(id) {
            warn!("Failed to mark {} dirty: {}", path.display(), e);
            return None;
        }
        info!("File changed: {}", path.display());
        Some(id)
    }
}

/// Check if a path should be ignored (e.g., target/, .git/, the kiln cache).
/// Only components below `root` count.
fn should_ignore_path(root: &Path, path: &Path) -> bool {
    let path = path.strip_prefix(root).unwrap_or(path);
    path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some("target" | ".git" | "node_modules" | kiln_core::CACHE_DIR)
        )
    })
}
