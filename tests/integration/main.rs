//! Integration tests for Kiln
//!
//! These tests verify that the runner, the graph cache, the watcher and the
//! CLI work together correctly.

use kiln_core::{FileId, Graph, graph_cache_path, load_graph, save_graph};
use kiln_runner::{FileHandler, Runner, RunnerConfig};
use kiln_watcher::{WatchEvent, WatcherService};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn kiln() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
}

/// Registers a counting `read` hook and a `dependencies` hook that links
/// `index.js` to `util.js`.
fn plugin(reads: &Arc<AtomicUsize>) -> impl Fn(&Runner) + use<> {
    let reads = Arc::clone(reads);
    move |runner: &Runner| {
        let reads = Arc::clone(&reads);
        runner
            .read(
                ["js"],
                FileHandler::sync("count-reads", move |id, build| {
                    reads.fetch_add(1, Ordering::SeqCst);
                    build.graph().write().file_mut(id)?.set_contents("read");
                    Ok(())
                }),
            )
            .dependencies(
                ["js"],
                FileHandler::sync("link", |id, build| {
                    let graph = build.graph();
                    let mut graph = graph.write();
                    if graph.file(id)?.path().ends_with("index.js") {
                        let util = graph.find_or_add_file("util.js");
                        graph.add_dependency(id, util)?;
                    }
                    Ok(())
                }),
            );
    }
}

fn file_id(runner: &Runner, path: &str) -> FileId {
    runner.graph().read().find_file(path).unwrap().id()
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let output = kiln().arg("--help").output().expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("kiln"));
    assert!(stdout.contains("build"));
    assert!(stdout.contains("watch"));
}

/// Test that a build writes outputs and a cache, and clear removes the cache
#[test]
fn test_cli_build_and_clear() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/a.txt"), "alpha").unwrap();
    std::fs::write(root.join("kiln.toml"), "types = [\"txt\"]\noutput = \"dist\"\n").unwrap();

    let output = kiln()
        .arg("--root")
        .arg(root)
        .args(["build", "src/a.txt"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read_to_string(root.join("dist/src/a.txt")).unwrap(), "alpha");

    let canonical = root.canonicalize().unwrap();
    let graph = load_graph(&canonical).unwrap().expect("cache was written");
    assert!(graph.find_file("src/a.txt").unwrap().is_parsed());

    let output = kiln().arg("--root").arg(root).arg("clear").output().unwrap();
    assert!(output.status.success());
    assert!(!graph_cache_path(&canonical).exists());
}

/// Test that --no-cache skips the graph cache
#[test]
fn test_cli_build_without_cache() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.txt"), "alpha").unwrap();

    let output = kiln()
        .arg("--root")
        .arg(root)
        .args(["build", "--no-cache", "--output", "out", "a.txt"])
        .output()
        .unwrap();
    // txt is not among the default types, so nothing is read or written
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(!graph_cache_path(root).exists());
    assert!(!root.join("out").exists());
}

/// Test that a build without entries is rejected
#[test]
fn test_cli_requires_entries() {
    let temp_dir = TempDir::new().unwrap();

    let output = kiln()
        .arg("--root")
        .arg(temp_dir.path())
        .arg("build")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no entry files"));
}

/// Test that a restored graph keeps the incremental fast path
#[tokio::test]
async fn test_cache_round_trip_skips_reads() {
    let temp_dir = TempDir::new().unwrap();
    let reads = Arc::new(AtomicUsize::new(0));

    let runner = Runner::new(RunnerConfig {
        root: temp_dir.path().to_path_buf(),
        concurrency: 8,
    });
    runner.use_plugin(plugin(&reads));
    runner.build(["index.js"]).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 2);
    save_graph(&runner.graph().read()).unwrap();

    let restored = load_graph(temp_dir.path()).unwrap().unwrap();
    let runner = Runner::with_graph(restored, 8);
    runner.use_plugin(plugin(&reads));
    let build = runner.build(["index.js"]).await.unwrap();

    assert_eq!(reads.load(Ordering::SeqCst), 2);
    assert_eq!(build.graph().read().len(), 2);
    let index = file_id(&runner, "index.js");
    let util = file_id(&runner, "util.js");
    assert!(runner.graph().read().has_dependency(index, util, false).unwrap());
}

/// Test that a watch batch marks files dirty so the next build re-reads them
#[tokio::test]
async fn test_watcher_drives_incremental_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let reads = Arc::new(AtomicUsize::new(0));
    let runner = Runner::with_graph(Graph::new(temp_dir.path()), 8);
    runner.use_plugin(plugin(&reads));
    runner.build(["index.js"]).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    let mut service = WatcherService::new(runner.clone())
        .unwrap()
        .with_debounce(Duration::from_millis(20));
    service
        .watcher()
        .sender()
        .send(WatchEvent::Modified(temp_dir.path().join("util.js")))
        .unwrap();

    let changed = service.next_batch().await.unwrap();
    assert_eq!(changed, vec![file_id(&runner, "util.js")]);

    runner.build(["index.js"]).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

/// Test that the cache lives under the project root
#[test]
fn test_cache_location() {
    let path = graph_cache_path(Path::new("/project"));
    assert_eq!(path, Path::new("/project/.kiln/graph.json.gz"));
}
