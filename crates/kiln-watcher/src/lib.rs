//! Filesystem events mapped onto the build graph

pub mod watcher;

pub use watcher::{DEFAULT_DEBOUNCE, FileWatcher, WatchEvent, WatcherService};
