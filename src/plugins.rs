//! Built-in file system plugins
//!
//! `stat` notices files that changed on disk since the graph was cached,
//! `buffer` reads file contents, `output` redirects compiled files into the
//! output directory and `write` puts them on disk.

use anyhow::Context;
use chrono::{DateTime, Utc};
use kiln_core::{Attribute, FileId};
use kiln_runner::{Build, FileHandler, Plugin, Runner};
use std::path::PathBuf;
use std::sync::Arc;

/// Attribute holding the last seen modification time.
pub const MTIME: &str = "mtime";

/// Marks a file dirty when its modification time moved since the last run.
pub struct Stat {
    types: Vec<String>,
}

impl Stat {
    pub fn new(types: &[String]) -> Self {
        Stat {
            types: types.to_vec(),
        }
    }
}

impl Plugin for Stat {
    fn register(&self, runner: &Runner) {
        runner.preread(&self.types, FileHandler::new("stat", stat));
    }
}

async fn stat(id: FileId, build: Arc<Build>) -> anyhow::Result<()> {
    let path = build.graph().read().file(id)?.initial_path().to_path_buf();
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("reading metadata of {}", path.display()))?;
    let mtime: DateTime<Utc> = metadata.modified()?.into();

    let previous = {
        let graph = build.graph();
        let mut graph = graph.write();
        let file = graph.file_mut(id)?;
        let previous = file.attribute(MTIME).and_then(Attribute::as_time);
        file.set_attribute(MTIME, mtime);
        previous
    };

    // no previous time means this file was never seen, so there is nothing stale
    if previous.is_some_and(|previous| previous != mtime) {
        tracing::debug!(path = %path.display(), "modified since last build");
        build.dirty(id)?;
    }
    Ok(())
}

/// Loads file contents from disk unless a handler already provided them.
pub struct Buffer {
    types: Vec<String>,
}

impl Buffer {
    pub fn new(types: &[String]) -> Self {
        Buffer {
            types: types.to_vec(),
        }
    }
}

impl Plugin for Buffer {
    fn register(&self, runner: &Runner) {
        runner.read(&self.types, FileHandler::new("buffer", buffer));
    }
}

async fn buffer(id: FileId, build: Arc<Build>) -> anyhow::Result<()> {
    let path = {
        let graph = build.graph();
        let graph = graph.read();
        let file = graph.file(id)?;
        if file.contents().is_some() {
            tracing::debug!(file = %file.relative().display(), "contents already set");
            return Ok(());
        }
        file.path().to_path_buf()
    };

    let contents = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "read file");
    build.graph().write().file_mut(id)?.set_contents(contents);
    Ok(())
}

/// Moves compiled files under the output directory, keeping their layout
/// relative to the project root.
pub struct Output {
    types: Vec<String>,
    dir: PathBuf,
}

impl Output {
    pub fn new(types: &[String], dir: impl Into<PathBuf>) -> Self {
        Output {
            types: types.to_vec(),
            dir: dir.into(),
        }
    }
}

impl Plugin for Output {
    fn register(&self, runner: &Runner) {
        let dir = self.dir.clone();
        runner.prewrite(
            &self.types,
            FileHandler::sync("output", move |id, build| {
                let graph = build.graph();
                let mut graph = graph.write();
                let target = graph.resolve(&dir);
                let file = graph.file_mut(id)?;
                let next = target.join(file.relative());
                tracing::debug!(from = %file.relative().display(), to = %next.display(), "output path");
                file.set_path(next);
                Ok(())
            }),
        );
    }
}

/// Writes file contents to the file's current path.
pub struct Write {
    types: Vec<String>,
}

impl Write {
    pub fn new(types: &[String]) -> Self {
        Write {
            types: types.to_vec(),
        }
    }
}

impl Plugin for Write {
    fn register(&self, runner: &Runner) {
        runner.write(&self.types, FileHandler::new("write", write));
    }
}

async fn write(id: FileId, build: Arc<Build>) -> anyhow::Result<()> {
    let (path, contents) = {
        let graph = build.graph();
        let graph = graph.read();
        let file = graph.file(id)?;
        if file.path() == file.initial_path() {
            anyhow::bail!(
                "will not write {} because it would overwrite the source file",
                file.relative().display()
            );
        }
        (file.path().to_path_buf(), file.contents().map(<[u8]>::to_vec))
    };
    let Some(contents) = contents else {
        tracing::debug!(path = %path.display(), "no contents, skipping write");
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(&path, &contents)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}

/// Register every built-in plugin for `types`.
pub fn register_builtins(runner: &Runner, types: &[String], output: &std::path::Path) {
    runner
        .use_plugin(Stat::new(types))
        .use_plugin(Buffer::new(types))
        .use_plugin(Output::new(types, output))
        .use_plugin(Write::new(types));
}
