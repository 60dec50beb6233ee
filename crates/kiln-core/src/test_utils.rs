//! Test utilities for graph construction

use crate::{FileId, Graph};

pub const ROOT: &str = "/project";

/// Build a graph from `(dependant, dependency)` name pairs. Every name becomes
/// a `<name>.js` file under [`ROOT`]; standalone files can be listed in `extra`.
pub fn graph_from_edges(edges: &[(&str, &str)], extra: &[&str]) -> Graph {
    let mut graph = Graph::new(ROOT);
    for (parent, child) in edges {
        let parent = graph.find_or_add_file(format!("{parent}.js"));
        let child = graph.find_or_add_file(format!("{child}.js"));
        graph.add_dependency(parent, child).unwrap();
    }
    for name in extra {
        graph.find_or_add_file(format!("{name}.js"));
    }
    graph
}

/// Id of the file named `<name>.js`.
pub fn id(graph: &Graph, name: &str) -> FileId {
    graph
        .find_file(format!("{name}.js"))
        .unwrap_or_else(|| panic!("{name}.js is not in the graph"))
        .id()
}

/// File stems for a list of ids, in order.
pub fn names(graph: &Graph, ids: &[FileId]) -> Vec<String> {
    ids.iter()
        .map(|&id| {
            graph
                .file(id)
                .unwrap()
                .path()
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_from_edges() {
        let graph = graph_from_edges(&[("a", "b"), ("b", "c")], &["d"]);
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.dependency_count(), 2);
        assert!(graph.has_dependency(id(&graph, "a"), id(&graph, "b"), false).unwrap());
    }
}
