//! Runner: hook registration plus the parse, compile and build entry points

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::{FileId, Graph, GraphError, SharedGraph};
use serde::{Deserialize, Serialize};

use crate::build::Build;
use crate::compile;
use crate::error::RunnerError;
use crate::handler::{BuildHandler, FileHandler};
use crate::hooks::{BuildPhase, FilePhase, Hooks};
use crate::parse;

pub const DEFAULT_CONCURRENCY: usize = 100;

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Settings used to construct a [`Runner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Maximum number of files processed at once within a phase.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            root: default_root(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Something that registers hooks on a runner.
pub trait Plugin {
    fn register(&self, runner: &Runner);
}

impl<F> Plugin for F
where
    F: Fn(&Runner),
{
    fn register(&self, runner: &Runner) {
        self(runner)
    }
}

#[derive(Debug)]
struct Inner {
    hooks: Hooks,
    graph: SharedGraph,
    concurrency: usize,
}

/// Long-lived orchestrator. Cheap to clone; clones share hooks and graph.
#[derive(Debug, Clone)]
pub struct Runner {
    inner: Arc<Inner>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_graph(Graph::new(config.root), config.concurrency)
    }

    /// Start from an existing graph, typically one restored from the cache.
    pub fn with_graph(graph: Graph, concurrency: usize) -> Self {
        tracing::debug!(root = %graph.root().display(), files = graph.len(), concurrency, "runner created");
        Runner {
            inner: Arc::new(Inner {
                hooks: Hooks::new(),
                graph: SharedGraph::new(graph),
                concurrency: concurrency.max(1),
            }),
        }
    }

    /// Handle to the persistent graph.
    pub fn graph(&self) -> SharedGraph {
        self.inner.graph.clone()
    }

    pub fn root(&self) -> PathBuf {
        self.inner.graph.read().root().to_path_buf()
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    pub fn use_plugin(&self, plugin: impl Plugin) -> &Self {
        plugin.register(self);
        self
    }

    pub fn use_plugins<P: Plugin>(&self, plugins: impl IntoIterator<Item = P>) -> &Self {
        for plugin in plugins {
            plugin.register(self);
        }
        self
    }

    pub fn add_build_hooks(&self, phase: BuildPhase, handler: BuildHandler) -> &Self {
        self.inner.hooks.add_build(phase, handler);
        self
    }

    /// Register `handler` once per file type.
    pub fn add_file_hooks<I>(&self, phase: FilePhase, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for file_type in types {
            self.inner.hooks.add_file(phase, file_type.as_ref(), handler.clone());
        }
        self
    }

    /// Runs before any file is parsed.
    pub fn preparse(&self, handler: BuildHandler) -> &Self {
        self.add_build_hooks(BuildPhase::Preparse, handler)
    }

    /// Runs once the graph reachable from the entries is fully parsed.
    pub fn postparse(&self, handler: BuildHandler) -> &Self {
        self.add_build_hooks(BuildPhase::Postparse, handler)
    }

    pub fn precompile(&self, handler: BuildHandler) -> &Self {
        self.add_build_hooks(BuildPhase::Precompile, handler)
    }

    /// Runs after every file has been written.
    pub fn postcompile(&self, handler: BuildHandler) -> &Self {
        self.add_build_hooks(BuildPhase::Postcompile, handler)
    }

    /// Runs on every parse, keyed by the type the file was created with.
    pub fn preread<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Preread, types, handler)
    }

    pub fn read<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Read, types, handler)
    }

    pub fn postread<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Postread, types, handler)
    }

    pub fn predependencies<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Predependencies, types, handler)
    }

    /// The place to add dependency edges to the graph.
    pub fn dependencies<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Dependencies, types, handler)
    }

    /// Runs during compile, one file at a time, dependencies first.
    pub fn postdependencies<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Postdependencies, types, handler)
    }

    pub fn prewrite<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Prewrite, types, handler)
    }

    pub fn write<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Write, types, handler)
    }

    pub fn postwrite<I>(&self, types: I, handler: FileHandler) -> &Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.add_file_hooks(FilePhase::Postwrite, types, handler)
    }

    /// Mark a file stale so the next parse runs its read phases again.
    pub fn dirty(&self, id: FileId) -> Result<(), GraphError> {
        self.inner.graph.write().dirty(id)
    }

    /// Discover and read everything reachable from `entries`.
    pub async fn parse<I, P>(&self, entries: I) -> anyhow::Result<Arc<Build>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let build = self.start(entries)?;
        parse::parse(&build).await?;
        build.timing().report();
        Ok(build)
    }

    /// Write out everything reachable from `entries` as of the last parse.
    pub async fn compile<I, P>(&self, entries: I) -> anyhow::Result<Arc<Build>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let build = self.start(entries)?;
        compile::compile(&build).await?;
        build.timing().report();
        Ok(build)
    }

    /// Parse then compile with one shared build.
    pub async fn build<I, P>(&self, entries: I) -> anyhow::Result<Arc<Build>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let build = self.start(entries)?;
        parse::parse(&build).await?;
        compile::compile(&build).await?;
        build.timing().report();
        Ok(build)
    }

    fn start<I, P>(&self, entries: I) -> Result<Arc<Build>, RunnerError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let entries: Vec<PathBuf> = {
            let graph = self.inner.graph.read();
            entries.into_iter().map(|entry| graph.resolve(entry)).collect()
        };
        if entries.is_empty() {
            return Err(RunnerError::MissingEntry);
        }
        Ok(Arc::new(Build::new(self.clone(), entries)))
    }
}
