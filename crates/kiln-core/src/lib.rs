//! Build graph, file vertices, and graph persistence

pub mod cache;
pub mod error;
pub mod file;
pub mod graph;
pub mod model;


#[cfg(test)]
pub mod test_utils;

pub use cache::{CACHE_DIR, GRAPH_CACHE, cache_dir, clear_cache, ensure_cache_dir, graph_cache_path, load_graph, save_graph};
pub use error::GraphError;
pub use file::{File, normalize};
pub use graph::{Graph, SharedGraph};
pub use model::{Attribute, FileId, FileSpec};
