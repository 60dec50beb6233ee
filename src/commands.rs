//! CLI command implementations

use crate::config::{CliOverrides, Config};
use crate::plugins;
use anyhow::Context;
use kiln_core::Graph;
use kiln_runner::Runner;
use kiln_watcher::WatcherService;
use std::path::{Path, PathBuf};

/// A runner wired up for one project, plus the settings it was built from.
struct Project {
    runner: Runner,
    config: Config,
}

impl Project {
    fn open(root: &Path, overrides: CliOverrides) -> anyhow::Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("project root {} does not exist", root.display()))?;
        let config = Config::load(&root)?.apply(overrides)?;
        if config.entries.is_empty() {
            anyhow::bail!("no entry files given; pass them as arguments or list them in kiln.toml");
        }

        let graph = if config.cache {
            load_cached(&root)
        } else {
            None
        };
        let graph = graph.unwrap_or_else(|| Graph::new(&root));
        let runner = Runner::with_graph(graph, config.concurrency);
        plugins::register_builtins(&runner, &config.types, &config.output);

        Ok(Project { runner, config })
    }

    fn save(&self) {
        if !self.config.cache {
            return;
        }
        let graph = self.runner.graph();
        let graph = graph.read();
        match kiln_core::save_graph(&graph) {
            Ok(path) => tracing::debug!("Saved graph cache to {}", path.display()),
            Err(e) => tracing::warn!("Failed to save graph cache: {:#}", e),
        }
    }
}

/// Restore the cached graph. A damaged cache or one written for another
/// root is dropped with a warning and the build starts cold.
fn load_cached(root: &Path) -> Option<Graph> {
    match kiln_core::load_graph(root) {
        Ok(Some(graph)) if graph.root() == root => {
            tracing::info!("Restored {} files from cache", graph.len());
            Some(graph)
        }
        Ok(Some(graph)) => {
            tracing::warn!(
                "Ignoring cache written for {} (project is {})",
                graph.root().display(),
                root.display()
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Ignoring unreadable graph cache: {:#}", e);
            None
        }
    }
}

pub async fn build(root: PathBuf, overrides: CliOverrides) -> anyhow::Result<()> {
    let project = Project::open(&root, overrides)?;
    let build = project.runner.build(&project.config.entries).await?;
    project.save();

    let graph = build.graph();
    tracing::info!(
        "Built {} files into {}",
        graph.read().len(),
        project.config.output.display()
    );
    Ok(())
}

pub async fn parse(root: PathBuf, overrides: CliOverrides) -> anyhow::Result<()> {
    let project = Project::open(&root, overrides)?;
    project.runner.parse(&project.config.entries).await?;
    project.save();

    let graph = project.runner.graph();
    let graph = graph.read();
    tracing::info!(
        "Parsed {} files, {} dependencies ({} bytes)",
        graph.len(),
        graph.dependency_count(),
        graph.contents_size()
    );
    Ok(())
}

pub async fn watch(root: PathBuf, overrides: CliOverrides) -> anyhow::Result<()> {
    let project = Project::open(&root, overrides)?;
    let entries = project.config.entries.clone();

    if let Err(e) = project.runner.build(&entries).await {
        tracing::error!("Initial build failed: {:#}", e);
    } else {
        project.save();
    }

    let mut service = WatcherService::new(project.runner.clone())?;
    service.start_watching()?;

    loop {
        let batch = tokio::select! {
            batch = service.next_batch() => batch,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping watch");
                break;
            }
        };
        let Some(changed) = batch else {
            break;
        };
        if changed.is_empty() {
            continue;
        }

        tracing::info!("Rebuilding after {} changed files", changed.len());
        match project.runner.build(&entries).await {
            Ok(_) => project.save(),
            Err(e) => tracing::error!("Build failed: {:#}", e),
        }
    }
    Ok(())
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Clearing cache for: {}", root.display());

    kiln_core::clear_cache(&root)?;

    tracing::info!("Cache cleared");
    Ok(())
}
