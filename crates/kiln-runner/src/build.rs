//! State for a single parse/compile/build invocation

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use dashmap::DashSet;
use kiln_core::{FileId, GraphError, SharedGraph};

use crate::hooks::{BuildPhase, FilePhase};
use crate::runner::Runner;
use crate::timing::Timing;

/// One run of the pipeline.
///
/// Handlers receive the build and reach the graph through [`Build::graph`].
/// During parse that is the runner's persistent graph; during compile it is a
/// disposable clone, so compile-time mutations never leak into later builds.
#[derive(Debug)]
pub struct Build {
    runner: Runner,
    entries: Vec<PathBuf>,
    graph: RwLock<SharedGraph>,
    timing: Timing,
    parsed: DashSet<FileId>,
    written: DashSet<FileId>,
}

impl Build {
    pub(crate) fn new(runner: Runner, entries: Vec<PathBuf>) -> Self {
        let graph = runner.graph();
        Build {
            runner,
            entries,
            graph: RwLock::new(graph),
            timing: Timing::new(),
            parsed: DashSet::new(),
            written: DashSet::new(),
        }
    }

    /// Handle to the graph this build currently operates on.
    pub fn graph(&self) -> SharedGraph {
        self.graph.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_graph(&self, graph: SharedGraph) {
        *self.graph.write().unwrap_or_else(|e| e.into_inner()) = graph;
    }

    /// Entry paths, resolved against the runner's root.
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn has_entry(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry == path)
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Mark a file stale in the runner's graph so the next parse re-reads it.
    pub fn dirty(&self, id: FileId) -> Result<(), GraphError> {
        self.runner.dirty(id)
    }

    /// Whether `id` was processed by this build's parse pass.
    pub fn is_parsed(&self, id: FileId) -> bool {
        self.parsed.contains(&id)
    }

    /// Whether `id` went through this build's write pass.
    pub fn is_written(&self, id: FileId) -> bool {
        self.written.contains(&id)
    }

    pub(crate) fn mark_parsed(&self, id: FileId) {
        self.parsed.insert(id);
    }

    /// Claim `id` for the write pass. Returns false if it was already claimed.
    pub(crate) fn claim_write(&self, id: FileId) -> bool {
        self.written.insert(id)
    }

    pub(crate) async fn run_build_hooks(self: &Arc<Self>, phase: BuildPhase) -> anyhow::Result<()> {
        let _timer = self.timing.start(phase.as_str());
        let timings = self.runner.hooks().run_build(phase, self).await?;
        self.timing.add_hooks(&timings);
        Ok(())
    }

    pub(crate) async fn run_file_hooks(
        self: &Arc<Self>,
        phase: FilePhase,
        file_type: &str,
        id: FileId,
    ) -> anyhow::Result<()> {
        let timings = self.runner.hooks().run_file(phase, file_type, id, self).await?;
        self.timing.add_hooks(&timings);
        Ok(())
    }
}
