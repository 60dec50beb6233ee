//! Unit tests for the runner pipeline

use crate::*;
use kiln_core::{FileId, GraphError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ROOT: &str = "/project";

#[derive(Debug, thiserror::Error)]
#[error("read failed for {0}")]
struct ReadFailed(String);

fn runner() -> Runner {
    Runner::new(RunnerConfig {
        root: ROOT.into(),
        concurrency: 4,
    })
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

fn counting(name: &str, counter: &Arc<AtomicUsize>) -> FileHandler {
    let counter = Arc::clone(counter);
    FileHandler::sync(name, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Handler that appends the file stem to `log`.
fn logging(name: &str, log: &Arc<Mutex<Vec<String>>>) -> FileHandler {
    let log = Arc::clone(log);
    FileHandler::sync(name, move |id, build| {
        let stem = stem(build, id);
        log.lock().unwrap().push(stem);
        Ok(())
    })
}

fn stem(build: &Build, id: FileId) -> String {
    let graph = build.graph();
    let graph = graph.read();
    graph
        .file(id)
        .unwrap()
        .path()
        .file_stem()
        .unwrap()
        .to_string_lossy()
        .to_string()
}

fn file_id(runner: &Runner, path: &str) -> FileId {
    runner
        .graph()
        .read()
        .find_file(path)
        .unwrap_or_else(|| panic!("{path} is not in the graph"))
        .id()
}

/// In-memory project: `read` fills contents, `dependencies` links each file to
/// the paths listed for it.
fn project(files: &[(&str, &[&str])]) -> impl Fn(&Runner) + use<> {
    let files: Arc<HashMap<String, Vec<String>>> = Arc::new(
        files
            .iter()
            .map(|(path, deps)| {
                (path.to_string(), deps.iter().map(|dep| dep.to_string()).collect())
            })
            .collect(),
    );

    move |runner: &Runner| {
        runner.read(
            ["js"],
            FileHandler::sync("fixture-read", |id, build| {
                let graph = build.graph();
                let mut graph = graph.write();
                let file = graph.file_mut(id)?;
                let contents = format!("// {}", file.relative().display());
                file.set_contents(contents);
                Ok(())
            }),
        );

        let files = Arc::clone(&files);
        runner.dependencies(
            ["js"],
            FileHandler::sync("fixture-dependencies", move |id, build| {
                let graph = build.graph();
                let mut graph = graph.write();
                let relative = graph.file(id)?.relative().to_string_lossy().to_string();
                for dependency in files.get(&relative).into_iter().flatten() {
                    let child = graph.find_or_add_file(dependency);
                    graph.add_dependency(id, child)?;
                }
                Ok(())
            }),
        );
    }
}

#[tokio::test]
async fn test_parse_discovers_dependencies() {
    let runner = runner();
    runner.use_plugin(project(&[
        ("a.js", &["b.js", "c.js"]),
        ("b.js", &["c.js"]),
        ("c.js", &[]),
    ]));

    let build = runner.parse(["a.js"]).await.unwrap();

    let graph = runner.graph();
    let graph = graph.read();
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.dependency_count(), 3);
    for path in ["a.js", "b.js", "c.js"] {
        let file = graph.find_file(path).unwrap();
        assert!(file.is_parsed());
        assert!(!file.is_parsing());
        assert_eq!(file.contents(), Some(format!("// {path}").as_bytes()));
        assert!(build.is_parsed(file.id()));
    }
}

#[tokio::test]
async fn test_build_resolves_entries_against_root() {
    let runner = runner();
    let build = runner.parse(["src/index.js"]).await.unwrap();
    assert_eq!(build.entries(), &[std::path::PathBuf::from("/project/src/index.js")]);
    assert!(build.has_entry(std::path::Path::new("/project/src/index.js")));
}

#[tokio::test]
async fn test_missing_entry() {
    let runner = runner();
    let error = runner.parse(Vec::<&str>::new()).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<RunnerError>(),
        Some(RunnerError::MissingEntry)
    ));

    let error = runner.build(Vec::<&str>::new()).await.unwrap_err();
    assert_eq!(error.to_string(), "an entry file is required");
}

#[tokio::test]
async fn test_second_parse_skips_read_phases() {
    let runner = runner();
    let prereads = counter();
    let reads = counter();
    runner
        .preread(["js"], counting("prereads", &prereads))
        .read(["js"], counting("reads", &reads));

    runner.parse(["a.js"]).await.unwrap();
    runner.parse(["a.js"]).await.unwrap();

    assert_eq!(count(&prereads), 2);
    assert_eq!(count(&reads), 1);
}

#[tokio::test]
async fn test_dirty_in_preread_forces_reread() {
    let runner = runner();
    let reads = counter();
    runner
        .preread(
            ["js"],
            FileHandler::sync("always-stale", |id, build| {
                build.dirty(id)?;
                Ok(())
            }),
        )
        .read(["js"], counting("reads", &reads));

    runner.parse(["a.js"]).await.unwrap();
    runner.parse(["a.js"]).await.unwrap();

    assert_eq!(count(&reads), 2);
}

#[tokio::test]
async fn test_runner_dirty_only_touches_one_file() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &[])]));
    let reads = Arc::new(Mutex::new(Vec::new()));
    runner.read(["js"], logging("reads", &reads));

    runner.parse(["a.js"]).await.unwrap();
    let b = file_id(&runner, "b.js");
    runner.dirty(b).unwrap();

    {
        let graph = runner.graph();
        let graph = graph.read();
        let file = graph.file(b).unwrap();
        assert!(file.contents().is_none());
        assert!(!file.is_parsed());
        assert!(graph.find_file("a.js").unwrap().is_parsed());
        // edges survive
        assert_eq!(graph.dependency_count(), 1);
    }

    runner.parse(["a.js"]).await.unwrap();
    assert_eq!(*reads.lock().unwrap(), vec!["a", "b", "b"]);
}

#[tokio::test]
async fn test_dirty_unknown_file() {
    let runner = runner();
    assert!(matches!(
        runner.dirty(FileId(42)),
        Err(GraphError::UnknownVertex(FileId(42)))
    ));
}

#[tokio::test]
async fn test_preread_uses_initial_type() {
    let runner = runner();
    let prereads = counter();
    let js_dependencies = counter();
    runner
        .preread(["coffee"], counting("prereads", &prereads))
        .read(
            ["coffee"],
            FileHandler::sync("transpile", |id, build| {
                build.graph().write().file_mut(id)?.set_type("js");
                Ok(())
            }),
        )
        .dependencies(["js"], counting("js-dependencies", &js_dependencies));

    runner.parse(["app.coffee"]).await.unwrap();
    let id = file_id(&runner, "app.coffee");
    assert_eq!(runner.graph().read().file(id).unwrap().file_type(), "js");

    runner.dirty(id).unwrap();
    runner.parse(["app.coffee"]).await.unwrap();

    assert_eq!(count(&prereads), 2);
    assert_eq!(count(&js_dependencies), 2);
}

#[tokio::test]
async fn test_handler_styles_run_in_registration_order() {
    let runner = runner();
    let log = Arc::new(Mutex::new(Vec::new()));

    let async_log = Arc::clone(&log);
    let sync_log = Arc::clone(&log);
    let callback_log = Arc::clone(&log);
    runner
        .read(
            ["js"],
            FileHandler::new("async", move |_, _| {
                let log = Arc::clone(&async_log);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().unwrap().push("async");
                    Ok(())
                }
            }),
        )
        .read(
            ["js"],
            FileHandler::sync("sync", move |_, _| {
                sync_log.lock().unwrap().push("sync");
                Ok(())
            }),
        )
        .read(
            ["js"],
            FileHandler::callback("callback", move |_, _, done| {
                let log = Arc::clone(&callback_log);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().unwrap().push("callback");
                    done.ok();
                });
            }),
        );

    runner.parse(["a.js"]).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["async", "sync", "callback"]);
}

#[tokio::test]
async fn test_dropped_callback_fails_the_hook() {
    let runner = runner();
    runner.read(["js"], FileHandler::callback("forgetful", |_, _, done| drop(done)));

    let error = runner.parse(["a.js"]).await.unwrap_err();
    match error.downcast_ref::<RunnerError>() {
        Some(RunnerError::CallbackDropped { handler }) => assert_eq!(handler, "forgetful"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_callback_error_propagates() {
    let runner = runner();
    runner.preparse(BuildHandler::callback("failing", |_, done| {
        done.finish(Err(ReadFailed("preparse".into()).into()))
    }));

    let error = runner.parse(["a.js"]).await.unwrap_err();
    assert!(error.downcast_ref::<ReadFailed>().is_some());
}

#[tokio::test]
async fn test_hook_error_aborts_parse_and_resets_parsing() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["bad.js"]), ("bad.js", &[])]));
    let postparse = counter();
    let postparse_handle = Arc::clone(&postparse);
    runner
        .postread(
            ["js"],
            FileHandler::sync("reject-bad", |id, build| {
                let graph = build.graph();
                let graph = graph.read();
                let file = graph.file(id)?;
                if file.path().ends_with("bad.js") {
                    return Err(ReadFailed(file.relative().display().to_string()).into());
                }
                Ok(())
            }),
        )
        .postparse(BuildHandler::sync("postparse", move |_| {
            postparse_handle.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

    let error = runner.parse(["a.js"]).await.unwrap_err();
    let failed = error.downcast_ref::<ReadFailed>().unwrap();
    assert_eq!(failed.0, "bad.js");
    assert_eq!(count(&postparse), 0);

    let graph = runner.graph();
    let graph = graph.read();
    let bad = graph.find_file("bad.js").unwrap();
    assert!(!bad.is_parsing());
    assert!(!bad.is_parsed());
    assert!(graph.find_file("a.js").unwrap().is_parsed());
}

#[tokio::test]
async fn test_dependencies_error_aborts_parse_and_resets_parsing() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &[])]));
    runner.dependencies(
        ["js"],
        FileHandler::sync("reject-a", |id, build| {
            let graph = build.graph();
            let graph = graph.read();
            let file = graph.file(id)?;
            if file.path().ends_with("a.js") {
                return Err(ReadFailed(file.relative().display().to_string()).into());
            }
            Ok(())
        }),
    );

    let error = runner.parse(["a.js"]).await.unwrap_err();
    assert_eq!(error.downcast_ref::<ReadFailed>().unwrap().0, "a.js");

    let graph = runner.graph();
    let graph = graph.read();
    let a = graph.find_file("a.js").unwrap();
    assert!(!a.is_parsing());
    assert!(!a.is_parsed());
    // the edge added before the failing handler stays, its target was never parsed
    let b = graph.find_file("b.js").unwrap();
    assert!(graph.has_dependency(a.id(), b.id(), false).unwrap());
    assert!(!b.is_parsed());
}

#[tokio::test]
async fn test_panicking_hook_does_not_lock_out_the_file() {
    let runner = runner();
    let reads = counter();
    let handle = Arc::clone(&reads);
    runner.read(
        ["js"],
        FileHandler::sync("flaky", move |_, _| {
            if handle.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok(())
        }),
    );

    let error = runner.parse(["a.js"]).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<RunnerError>(),
        Some(RunnerError::TaskPanicked(_))
    ));
    let id = file_id(&runner, "a.js");
    assert!(!runner.graph().read().file(id).unwrap().is_parsing());

    runner.parse(["a.js"]).await.unwrap();
    assert_eq!(count(&reads), 2);
    assert!(runner.graph().read().file(id).unwrap().is_parsed());
}

#[tokio::test]
async fn test_parse_respects_concurrency() {
    let runner = Runner::new(RunnerConfig {
        root: ROOT.into(),
        concurrency: 3,
    });
    let deps: Vec<String> = (0..20).map(|n| format!("dep{n}.js")).collect();
    let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
    runner.use_plugin(project(&[("index.js", dep_refs.as_slice())]));

    let active = counter();
    let peak = counter();
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    runner.postread(
        ["js"],
        FileHandler::new("slow", move |_, _| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    runner.parse(["index.js"]).await.unwrap();
    assert_eq!(runner.graph().read().len(), 21);
    assert!(count(&peak) <= 3);
}

#[tokio::test]
async fn test_postdependencies_run_in_topological_order() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &["c.js"]), ("c.js", &[])]));
    let order = Arc::new(Mutex::new(Vec::new()));
    runner.postdependencies(["js"], logging("order", &order));

    runner.build(["a.js"]).await.unwrap();

    let order = order.lock().unwrap().clone();
    insta::assert_debug_snapshot!(order, @r#"
    [
        "c",
        "b",
        "a",
    ]
    "#);
}

#[tokio::test]
async fn test_compile_breaks_cycles() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &["a.js"])]));
    let visited = counter();
    runner.postdependencies(["js"], counting("visited", &visited));

    let build = runner.build(["a.js"]).await.unwrap();

    assert_eq!(count(&visited), 2);
    assert_eq!(build.graph().read().dependency_count(), 1);
    // the persistent graph keeps the cycle
    assert_eq!(runner.graph().read().dependency_count(), 2);
}

#[tokio::test]
async fn test_compile_prunes_to_entries() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &[]), ("z.js", &[])]));
    runner.parse(["a.js", "z.js"]).await.unwrap();

    let written = Arc::new(Mutex::new(Vec::new()));
    runner.write(["js"], logging("written", &written));

    let build = runner.compile(["a.js"]).await.unwrap();
    assert!(build.graph().read().find_file("z.js").is_none());
    assert_eq!(runner.graph().read().len(), 3);

    let mut written = written.lock().unwrap().clone();
    written.sort();
    assert_eq!(written, vec!["a", "b"]);
}

#[tokio::test]
async fn test_compile_works_on_a_copy() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &[])]));
    runner.postdependencies(
        ["js"],
        FileHandler::sync("bundle", |id, build| {
            let graph = build.graph();
            let mut graph = graph.write();
            graph.file_mut(id)?.set_contents("bundled");
            graph.file_mut(id)?.set_attribute("bundled", true);
            Ok(())
        }),
    );

    let build = runner.build(["a.js"]).await.unwrap();
    let a = file_id(&runner, "a.js");

    assert!(!build.graph().ptr_eq(&runner.graph()));
    assert_eq!(build.graph().read().file(a).unwrap().contents(), Some(&b"bundled"[..]));
    let graph = runner.graph();
    let graph = graph.read();
    let original = graph.file(a).unwrap();
    assert_eq!(original.contents(), Some(&b"// a.js"[..]));
    assert!(original.attribute("bundled").is_none());
}

#[tokio::test]
async fn test_files_added_during_write_are_written_once() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &[])]));
    let gz_writes = counter();
    let js_writes = counter();
    runner
        .write(
            ["js"],
            FileHandler::sync("gzip", |id, build| {
                let graph = build.graph();
                let mut graph = graph.write();
                let path = graph.file(id)?.path().with_extension("js.gz");
                graph.copy_file(id, path)?;
                Ok(())
            }),
        )
        .write(["js"], counting("js-writes", &js_writes))
        .write(["gz"], counting("gz-writes", &gz_writes));

    let build = runner.build(["a.js"]).await.unwrap();

    assert_eq!(count(&js_writes), 2);
    assert_eq!(count(&gz_writes), 2);
    let graph = build.graph();
    let graph = graph.read();
    assert_eq!(graph.len(), 4);
    assert!(graph.file_ids().into_iter().all(|id| build.is_written(id)));
}

#[tokio::test]
async fn test_compile_without_files_skips_postcompile() {
    let runner = runner();
    let postcompile = counter();
    let handle = Arc::clone(&postcompile);
    runner.postcompile(BuildHandler::sync("postcompile", move |_| {
        handle.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    let build = runner.compile(["never-parsed.js"]).await.unwrap();
    assert!(build.graph().read().is_empty());
    assert_eq!(count(&postcompile), 0);
}

#[tokio::test]
async fn test_build_phases_run_once_each() {
    let runner = runner();
    let log = Arc::new(Mutex::new(Vec::new()));
    for (phase, label) in [
        (BuildPhase::Preparse, "preparse"),
        (BuildPhase::Postparse, "postparse"),
        (BuildPhase::Precompile, "precompile"),
        (BuildPhase::Postcompile, "postcompile"),
    ] {
        let log = Arc::clone(&log);
        runner.add_build_hooks(
            phase,
            BuildHandler::new(label, move |_| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(label);
                    Ok(())
                }
            }),
        );
    }

    let build = runner.build(["a.js"]).await.unwrap();
    let a = file_id(&runner, "a.js");
    assert!(build.is_parsed(a));
    assert!(build.is_written(a));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["preparse", "postparse", "precompile", "postcompile"]
    );
}

#[tokio::test]
async fn test_struct_hooks() {
    struct Minify {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl FileHook for Minify {
        fn name(&self) -> &str {
            "minify"
        }

        async fn run(&self, id: FileId, build: Arc<Build>) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let graph = build.graph();
            let mut graph = graph.write();
            let file = graph.file_mut(id)?;
            let contents = file.take_contents().unwrap_or_default();
            let trimmed: Vec<u8> = contents.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
            file.set_contents(trimmed);
            Ok(())
        }
    }

    struct Announce;

    #[async_trait::async_trait]
    impl BuildHook for Announce {
        async fn run(&self, build: Arc<Build>) -> anyhow::Result<()> {
            build.timing().add("announce", Duration::from_millis(1));
            Ok(())
        }
    }

    let runner = runner();
    let calls = counter();
    runner
        .use_plugin(project(&[("a.js", &[])]))
        .postread(
            ["js"],
            FileHandler::from_hook(Minify {
                calls: Arc::clone(&calls),
            }),
        )
        .postparse(BuildHandler::from_hook(Announce));

    let build = runner.parse(["a.js"]).await.unwrap();
    assert_eq!(count(&calls), 1);
    let a = file_id(&runner, "a.js");
    assert_eq!(runner.graph().read().file(a).unwrap().contents(), Some(&b"//a.js"[..]));
    assert!(build.timing().get("postread:js:minify").is_some());
    assert_eq!(build.timing().get("announce"), Some(Duration::from_millis(1)));
}

#[tokio::test]
async fn test_multi_type_registration() {
    let runner = runner();
    let reads = counter();
    runner.read(["JS", "css"], counting("reads", &reads));

    assert_eq!(runner.hooks().len(&HookKey::File(FilePhase::Read, "js".into())), 1);
    assert_eq!(runner.hooks().len(&HookKey::File(FilePhase::Read, "css".into())), 1);
    assert_eq!(runner.hooks().len(&HookKey::File(FilePhase::Write, "js".into())), 0);

    runner.parse(["a.js", "b.css", "c.html"]).await.unwrap();
    assert_eq!(count(&reads), 2);
}

#[tokio::test]
async fn test_timing_is_recorded() {
    let runner = runner();
    runner.use_plugin(project(&[("a.js", &["b.js"]), ("b.js", &[])]));

    let build = runner.build(["a.js"]).await.unwrap();
    let timing = build.timing();
    for label in [
        "parse",
        "compile",
        "preparse",
        "postcompile",
        "read:js:fixture-read",
        "dependencies:js:fixture-dependencies",
    ] {
        assert!(timing.get(label).is_some(), "missing timing for {label}");
    }
    assert!(timing.get("write:js:fixture-read").is_none());
}

#[test]
fn test_hook_keys_display() {
    assert_eq!(HookKey::Build(BuildPhase::Preparse).to_string(), "preparse");
    assert_eq!(
        HookKey::File(FilePhase::Postdependencies, "css".into()).to_string(),
        "postdependencies:css"
    );
}

#[test]
fn test_runner_config_defaults() {
    let config: RunnerConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    assert_eq!(config.root, std::path::PathBuf::from("."));
}

#[test]
fn test_runner_clones_share_state() {
    let runner = runner();
    let clone = runner.clone();
    clone.read(["js"], counting("reads", &counter()));
    assert!(runner.graph().ptr_eq(&clone.graph()));
    assert_eq!(runner.hooks().len(&HookKey::File(FilePhase::Read, "js".into())), 1);
}

#[tokio::test]
async fn test_plugin_trait_objects() {
    struct Types(Vec<&'static str>, Arc<AtomicUsize>);

    impl Plugin for Types {
        fn register(&self, runner: &Runner) {
            runner.preread(self.0.iter(), counting("types", &self.1));
        }
    }

    let runner = runner();
    let prereads = counter();
    runner.use_plugins([Types(vec!["js"], Arc::clone(&prereads)), Types(vec!["css"], Arc::clone(&prereads))]);

    tokio_test::assert_ok!(runner.parse(["a.js", "b.css"]).await);
    assert_eq!(count(&prereads), 2);
}
