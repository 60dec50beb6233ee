//! On-disk cache for the build graph

use crate::graph::Graph;
use anyhow::Context;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Cache directory: .kiln/
pub const CACHE_DIR: &str = ".kiln";

/// Graph cache file
pub const GRAPH_CACHE: &str = "graph.json.gz";

/// Get cache directory path
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

/// Get graph cache file path
pub fn graph_cache_path(root: &Path) -> PathBuf {
    root.join(CACHE_DIR).join(GRAPH_CACHE)
}

/// Ensure cache directory exists
pub fn ensure_cache_dir(root: &Path) -> std::io::Result<()> {
    let cache = cache_dir(root);
    if !cache.exists() {
        std::fs::create_dir_all(&cache)?;
    }
    Ok(())
}

/// Save the graph under its own root. Returns the cache file path.
///
/// The file is written next to its final location and renamed into place so
/// a crash mid-write never leaves a truncated cache behind.
pub fn save_graph(graph: &Graph) -> anyhow::Result<PathBuf> {
    let started = Instant::now();
    let root = graph.root();
    ensure_cache_dir(root)?;
    let path = graph_cache_path(root);

    let json = graph.to_json()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes())?;
    let compressed = encoder.finish()?;

    let staging = path.with_extension("gz.tmp");
    std::fs::write(&staging, &compressed)
        .with_context(|| format!("writing {}", staging.display()))?;
    std::fs::rename(&staging, &path)
        .with_context(|| format!("moving cache into {}", path.display()))?;

    tracing::debug!(
        path = %path.display(),
        bytes = compressed.len(),
        elapsed = ?started.elapsed(),
        "graph cache saved"
    );
    Ok(path)
}

/// Load the graph cached for `root`, if any.
pub fn load_graph(root: &Path) -> anyhow::Result<Option<Graph>> {
    let started = Instant::now();
    let path = graph_cache_path(root);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no graph cache");
        return Ok(None);
    }

    let compressed =
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let mut json = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut json)
        .with_context(|| format!("decompressing {}", path.display()))?;
    let graph = Graph::from_json(&json)?;

    tracing::debug!(
        path = %path.display(),
        files = graph.len(),
        elapsed = ?started.elapsed(),
        "graph cache loaded"
    );
    Ok(Some(graph))
}

/// Clear cache directory
pub fn clear_cache(root: &Path) -> std::io::Result<()> {
    let cache = cache_dir(root);
    if cache.exists() {
        std::fs::remove_dir_all(&cache)?;
    }
    Ok(())
}
