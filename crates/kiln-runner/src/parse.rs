//! Parse pass: discover the graph reachable from the entries

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use kiln_core::FileId;

use crate::build::Build;
use crate::hooks::{BuildPhase, FilePhase};
use crate::queue::Queue;

/// File phases that only run for files not yet parsed by this runner.
const READ_PHASES: [FilePhase; 4] = [
    FilePhase::Read,
    FilePhase::Postread,
    FilePhase::Predependencies,
    FilePhase::Dependencies,
];

pub(crate) async fn parse(build: &Arc<Build>) -> anyhow::Result<()> {
    let _timer = build.timing().start("parse");
    tracing::debug!(entries = ?build.entries(), "parse started");

    build.run_build_hooks(BuildPhase::Preparse).await?;

    let graph = build.graph();
    let entries: Vec<FileId> = {
        let mut graph = graph.write();
        build
            .entries()
            .iter()
            .map(|entry| graph.find_or_add_file(entry))
            .collect()
    };

    let queue = Queue::with_items(entries, build.runner().concurrency());
    let handle = queue.clone();
    let jobs = Arc::clone(build);
    queue
        .run(move |id| parse_file(Arc::clone(&jobs), handle.clone(), id).boxed())
        .await?;

    build.run_build_hooks(BuildPhase::Postparse).await?;

    let graph = graph.read();
    tracing::info!(
        files = graph.len(),
        dependencies = graph.dependency_count(),
        "parse finished"
    );
    Ok(())
}

async fn parse_file(build: Arc<Build>, queue: Queue<FileId>, id: FileId) -> anyhow::Result<()> {
    let graph = build.graph();

    let initial_type = {
        let mut graph = graph.write();
        let Some(file) = graph.get_file_mut(id) else {
            tracing::debug!(file = %id, "file left the graph before parsing");
            return Ok(());
        };
        if file.is_parsing() {
            tracing::debug!(file = %file.relative().display(), "already being parsed");
            return Ok(());
        }
        if build.is_parsed(id) {
            tracing::debug!(file = %file.relative().display(), "already parsed for this build");
            return Ok(());
        }
        tracing::debug!(file = %file.relative().display(), "parsing");
        file.set_parsing(true);
        file.initial_type()
    };

    let outcome = AssertUnwindSafe(read_file(&build, id, &initial_type))
        .catch_unwind()
        .await;

    if let Some(file) = graph.write().get_file_mut(id) {
        file.set_parsing(false);
    }
    // the queue reports the panic once the flag is clear
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(panic) => std::panic::resume_unwind(panic),
    };
    if let Err(error) = outcome {
        tracing::debug!(file = %id, error = %error, "parse failed");
        return Err(error);
    }

    build.mark_parsed(id);
    let dependencies = graph.read().dependencies_of(id, false).unwrap_or_default();
    for dependency in dependencies {
        queue.add(dependency);
    }
    Ok(())
}

async fn read_file(build: &Arc<Build>, id: FileId, initial_type: &str) -> anyhow::Result<()> {
    // preread may dirty the file, so it always runs and always sees the
    // type the file was created with
    build.run_file_hooks(FilePhase::Preread, initial_type, id).await?;

    if build.graph().read().file(id)?.is_parsed() {
        tracing::debug!(file = %id, "already parsed by this runner");
        return Ok(());
    }

    for phase in READ_PHASES {
        let file_type = build.graph().read().file(id)?.file_type();
        build.run_file_hooks(phase, &file_type, id).await?;
    }

    let graph = build.graph();
    let mut graph = graph.write();
    let file = graph.file_mut(id)?;
    file.set_parsed(true);
    tracing::debug!(file = %file.relative().display(), "parsed");
    Ok(())
}
