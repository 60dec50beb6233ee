//! Compile pass: order, transform and write a pruned copy of the graph

use std::sync::Arc;

use futures_util::FutureExt;
use kiln_core::{FileId, SharedGraph};

use crate::build::Build;
use crate::hooks::{BuildPhase, FilePhase};
use crate::queue::Queue;

const WRITE_PHASES: [FilePhase; 3] = [FilePhase::Prewrite, FilePhase::Write, FilePhase::Postwrite];

pub(crate) async fn compile(build: &Arc<Build>) -> anyhow::Result<()> {
    let _timer = build.timing().start("compile");
    tracing::debug!(entries = ?build.entries(), "compile started");

    build.run_build_hooks(BuildPhase::Precompile).await?;

    let graph = {
        let _timer = build.timing().start("compile:clone");
        let mut graph = build.runner().graph().snapshot();

        let anchors: Vec<FileId> = build
            .entries()
            .iter()
            .filter_map(|entry| graph.find_file(entry).map(|file| file.id()))
            .collect();
        let pruned = graph.prune(&anchors)?;
        // cycles a plugin introduced and never resolved are cut arbitrarily
        let cuts = graph.remove_cycles();
        if cuts > 0 {
            tracing::debug!(cuts, "removed dependency cycles");
        }
        tracing::debug!(files = graph.len(), pruned, "compile graph prepared");
        SharedGraph::new(graph)
    };
    build.set_graph(graph.clone());

    if graph.read().is_empty() {
        tracing::info!("nothing to compile");
        return Ok(());
    }

    postdependencies(build, &graph).await?;
    write_files(build, &graph).await?;

    build.run_build_hooks(BuildPhase::Postcompile).await?;

    tracing::info!(files = graph.read().len(), "compile finished");
    Ok(())
}

/// Run `postdependencies` one file at a time, dependencies first, so a
/// handler can fold a dependency into its dependants before they are visited.
async fn postdependencies(build: &Arc<Build>, graph: &SharedGraph) -> anyhow::Result<()> {
    let _timer = build.timing().start("compile:postdependencies");
    let order = graph.read().topological()?;
    for id in order {
        let file_type = match graph.read().get_file(id) {
            Some(file) => file.file_type(),
            // removed by an earlier handler in this pass
            None => continue,
        };
        build
            .run_file_hooks(FilePhase::Postdependencies, &file_type, id)
            .await?;
    }
    Ok(())
}

async fn write_files(build: &Arc<Build>, graph: &SharedGraph) -> anyhow::Result<()> {
    let _timer = build.timing().start("compile:write");
    let queue = Queue::with_items(graph.read().file_ids(), build.runner().concurrency());
    let handle = queue.clone();
    let jobs = Arc::clone(build);
    queue
        .run(move |id| write_file(Arc::clone(&jobs), handle.clone(), id).boxed())
        .await
}

async fn write_file(build: Arc<Build>, queue: Queue<FileId>, id: FileId) -> anyhow::Result<()> {
    if !build.claim_write(id) {
        return Ok(());
    }
    let graph = build.graph();

    for phase in WRITE_PHASES {
        let file_type = match graph.read().get_file(id) {
            Some(file) => file.file_type(),
            None => return Ok(()),
        };
        build.run_file_hooks(phase, &file_type, id).await?;
    }

    // write handlers may add files (compressed or minified variants and the
    // like); anything not yet written joins this pass
    let unwritten: Vec<FileId> = graph
        .read()
        .file_ids()
        .into_iter()
        .filter(|id| !build.is_written(*id))
        .collect();
    for id in unwritten {
        queue.add(id);
    }
    Ok(())
}
