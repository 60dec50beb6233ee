//! Build graph wrapper using petgraph::StableDiGraph keyed by FileId
//!
//! Edges point from a dependency to the file that depends on it. With that
//! orientation a plain topological sort lists dependencies before their
//! dependants, which is the order the compile phase needs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GraphError;
use crate::file::{File, normalize};
use crate::model::{FileId, FileSpec};

/// The dependency graph: files as vertices, "depends on" as edges.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "GraphSnapshot", try_from = "GraphSnapshot")]
pub struct Graph {
    root: PathBuf,
    inner: StableDiGraph<File, ()>,
    index: HashMap<FileId, NodeIndex>,
    next_id: u64,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("root", &self.root)
            .field("file_count", &self.inner.node_count())
            .field("dependency_count", &self.inner.edge_count())
            .finish()
    }
}

impl Graph {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Graph {
            root: root.into(),
            inner: StableDiGraph::new(),
            index: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path against the graph root and collapse `.` and `..`.
    /// Absolute paths are only normalized.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        normalize(&self.root.join(path))
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Number of dependency links.
    pub fn dependency_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Insert a new file. Fails if an explicit id is already taken.
    pub fn add_file(&mut self, spec: impl Into<FileSpec>) -> Result<FileId, GraphError> {
        let spec = spec.into();
        let id = match spec.id {
            Some(id) if self.index.contains_key(&id) => {
                return Err(GraphError::DuplicateVertex(id));
            }
            Some(id) => id,
            None => self.allocate_id(),
        };
        let path = self.resolve(&spec.path);
        debug!(%id, path = %path.display(), "adding file");
        self.insert(File::new(id, path, self.root.clone()));
        Ok(id)
    }

    /// Look up a file by path, inserting it when missing.
    ///
    /// Callers hold the graph's write lock for the whole call, so two hooks
    /// resolving the same new path can never create two vertices for it.
    pub fn find_or_add_file(&mut self, path: impl AsRef<Path>) -> FileId {
        let path = self.resolve(path);
        if let Some(file) = self.find_file(&path) {
            return file.id();
        }
        let id = self.allocate_id();
        debug!(%id, path = %path.display(), "adding file");
        self.insert(File::new(id, path, self.root.clone()));
        id
    }

    /// Add a copy of an existing file under a new path and a fresh id.
    pub fn copy_file(&mut self, id: FileId, path: impl AsRef<Path>) -> Result<FileId, GraphError> {
        let path = self.resolve(path);
        let copy_id = self.allocate_id();
        let copy = self.file(id)?.copy_as(copy_id, path);
        debug!(from = %id, to = %copy_id, "copying file");
        self.insert(copy);
        Ok(copy_id)
    }

    fn allocate_id(&mut self) -> FileId {
        let id = FileId(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert(&mut self, mut file: File) {
        file.set_base(self.root.clone());
        let id = file.id();
        self.next_id = self.next_id.max(id.0 + 1);
        let idx = self.inner.add_node(file);
        self.index.insert(id, idx);
    }

    fn node(&self, id: FileId) -> Result<NodeIndex, GraphError> {
        self.index
            .get(&id)
            .copied()
            .ok_or(GraphError::UnknownVertex(id))
    }

    fn id_at(&self, idx: NodeIndex) -> Option<FileId> {
        self.inner.node_weight(idx).map(File::id)
    }

    pub fn has_file(&self, id: FileId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn file(&self, id: FileId) -> Result<&File, GraphError> {
        let idx = self.node(id)?;
        self.inner
            .node_weight(idx)
            .ok_or(GraphError::UnknownVertex(id))
    }

    pub fn file_mut(&mut self, id: FileId) -> Result<&mut File, GraphError> {
        let idx = self.node(id)?;
        self.inner
            .node_weight_mut(idx)
            .ok_or(GraphError::UnknownVertex(id))
    }

    pub fn get_file(&self, id: FileId) -> Option<&File> {
        self.file(id).ok()
    }

    pub fn get_file_mut(&mut self, id: FileId) -> Option<&mut File> {
        self.file_mut(id).ok()
    }

    /// Find the first file that has, or ever had, the given path.
    pub fn find_file(&self, path: impl AsRef<Path>) -> Option<&File> {
        let path = self.resolve(path);
        let found = self.files().find(|file| file.has_path(&path));
        debug!(path = %path.display(), found = found.is_some(), "searched for file");
        found
    }

    /// Iterate over all files in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    pub fn file_ids(&self) -> Vec<FileId> {
        self.files().map(File::id).collect()
    }

    /// All file ids with every dependency listed before its dependants.
    pub fn topological(&self) -> Result<Vec<FileId>, GraphError> {
        let order = toposort(&self.inner, None).map_err(|cycle| {
            GraphError::Cycle(self.id_at(cycle.node_id()).unwrap_or(FileId(u64::MAX)))
        })?;
        Ok(order.into_iter().filter_map(|idx| self.id_at(idx)).collect())
    }

    /// All files, optionally in topological order.
    pub fn get_files(&self, topological: bool) -> Result<Vec<&File>, GraphError> {
        if !topological {
            return Ok(self.files().collect());
        }
        self.topological()?
            .into_iter()
            .map(|id| self.file(id))
            .collect()
    }

    /// Remove a file. Without `force`, a file that still has dependencies or
    /// dependants is left in place and an error is returned.
    pub fn remove_file(&mut self, id: FileId, force: bool) -> Result<File, GraphError> {
        let idx = self.node(id)?;
        if !force {
            let degree = self.inner.edges_directed(idx, Direction::Incoming).count()
                + self.inner.edges_directed(idx, Direction::Outgoing).count();
            if degree > 0 {
                let path = self.file(id)?.path().to_path_buf();
                return Err(GraphError::NonEmptyVertex { id, path });
            }
        }
        self.index.remove(&id);
        let file = self
            .inner
            .remove_node(idx)
            .ok_or(GraphError::UnknownVertex(id))?;
        debug!(%id, force, path = %file.relative().display(), "removed file");
        Ok(file)
    }

    /// Record that `parent` depends on `child`.
    pub fn add_dependency(&mut self, parent: FileId, child: FileId) -> Result<(), GraphError> {
        let parent_idx = self.node(parent)?;
        let child_idx = self.node(child)?;
        self.inner.update_edge(child_idx, parent_idx, ());
        debug!(%parent, %child, "added dependency");
        Ok(())
    }

    pub fn remove_dependency(&mut self, parent: FileId, child: FileId) -> Result<(), GraphError> {
        let parent_idx = self.node(parent)?;
        let child_idx = self.node(child)?;
        if let Some(edge) = self.inner.find_edge(child_idx, parent_idx) {
            self.inner.remove_edge(edge);
            debug!(%parent, %child, "removed dependency");
        }
        Ok(())
    }

    pub fn has_dependency(
        &self,
        parent: FileId,
        child: FileId,
        recursive: bool,
    ) -> Result<bool, GraphError> {
        let parent_idx = self.node(parent)?;
        let child_idx = self.node(child)?;
        if recursive {
            Ok(has_path_connecting(&self.inner, child_idx, parent_idx, None))
        } else {
            Ok(self.inner.find_edge(child_idx, parent_idx).is_some())
        }
    }

    /// Record that `parent` is a dependant of `child`. Mirror of `add_dependency`.
    pub fn add_dependant(&mut self, child: FileId, parent: FileId) -> Result<(), GraphError> {
        self.add_dependency(parent, child)
    }

    pub fn remove_dependant(&mut self, child: FileId, parent: FileId) -> Result<(), GraphError> {
        self.remove_dependency(parent, child)
    }

    pub fn has_dependant(
        &self,
        child: FileId,
        parent: FileId,
        recursive: bool,
    ) -> Result<bool, GraphError> {
        self.has_dependency(parent, child, recursive)
    }

    /// Files `id` depends on, directly or transitively.
    pub fn dependencies_of(&self, id: FileId, recursive: bool) -> Result<Vec<FileId>, GraphError> {
        self.neighbors(id, Direction::Incoming, recursive)
    }

    /// Files that depend on `id`, directly or transitively.
    pub fn dependants_of(&self, id: FileId, recursive: bool) -> Result<Vec<FileId>, GraphError> {
        self.neighbors(id, Direction::Outgoing, recursive)
    }

    fn neighbors(
        &self,
        id: FileId,
        direction: Direction,
        recursive: bool,
    ) -> Result<Vec<FileId>, GraphError> {
        let start = self.node(id)?;
        if !recursive {
            return Ok(self
                .inner
                .neighbors_directed(start, direction)
                .filter_map(|idx| self.id_at(idx))
                .collect());
        }

        let mut found = Vec::new();
        match direction {
            Direction::Outgoing => {
                let mut dfs = Dfs::new(&self.inner, start);
                while let Some(idx) = dfs.next(&self.inner) {
                    found.push(idx);
                }
            }
            Direction::Incoming => {
                let reversed = Reversed(&self.inner);
                let mut dfs = Dfs::new(reversed, start);
                while let Some(idx) = dfs.next(reversed) {
                    found.push(idx);
                }
            }
        }
        Ok(found
            .into_iter()
            .filter(|&idx| idx != start)
            .filter_map(|idx| self.id_at(idx))
            .collect())
    }

    /// Drop every file that cannot be reached from `anchors` by following
    /// dependencies. Anchors themselves always survive. Returns the number of
    /// files removed.
    pub fn prune(&mut self, anchors: &[FileId]) -> Result<usize, GraphError> {
        let started = Instant::now();
        let mut keep: HashSet<FileId> = HashSet::new();
        for &anchor in anchors {
            keep.insert(anchor);
            keep.extend(self.dependencies_of(anchor, true)?);
        }

        let doomed: Vec<FileId> = self
            .files()
            .map(File::id)
            .filter(|id| !keep.contains(id))
            .collect();
        for &id in &doomed {
            self.remove_file(id, true)?;
        }

        debug!(
            removed = doomed.len(),
            remaining = self.len(),
            elapsed = ?started.elapsed(),
            "pruned graph"
        );
        Ok(doomed.len())
    }

    /// Break every cycle by cutting one edge at a time. Returns the number of
    /// edges removed.
    ///
    /// Within a detected cycle the vertex with the most dependants is cut from
    /// its successor, on the theory that it is already the best-connected
    /// vertex and loses the least by dropping one link.
    pub fn remove_cycles(&mut self) -> usize {
        let started = Instant::now();
        let mut count = 0;
        while let Some(cycle) = self.find_cycle() {
            let degrees: Vec<usize> = cycle
                .iter()
                .map(|&idx| {
                    self.inner
                        .neighbors_directed(idx, Direction::Outgoing)
                        .count()
                })
                .collect();
            let highest = degrees.iter().copied().max().unwrap_or(0);
            let at = degrees.iter().position(|&d| d == highest).unwrap_or(0);
            let from = cycle[at];
            let to = cycle[(at + 1) % cycle.len()];

            debug!(
                len = cycle.len(),
                from = ?self.id_at(from),
                to = ?self.id_at(to),
                "cycle detected, cutting edge"
            );
            match self.inner.find_edge(from, to) {
                Some(edge) => {
                    self.inner.remove_edge(edge);
                    count += 1;
                }
                // find_cycle only reports real edges, so this cannot loop forever
                None => break,
            }
        }
        debug!(count, elapsed = ?started.elapsed(), "removed cycles");
        count
    }

    /// Find one cycle, ordered so every vertex's edge leads to the next one
    /// and the last vertex leads back to the first.
    fn find_cycle(&self) -> Option<Vec<NodeIndex>> {
        let mut done: HashSet<NodeIndex> = HashSet::new();

        for start in self.inner.node_indices() {
            if done.contains(&start) {
                continue;
            }
            let mut path = vec![start];
            let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);
            let mut frames = vec![self.successors(start)];

            while !frames.is_empty() {
                match frames.last_mut().and_then(Vec::pop) {
                    Some(next) => {
                        if on_path.contains(&next) {
                            let from = path.iter().position(|&idx| idx == next)?;
                            return Some(path[from..].to_vec());
                        }
                        if done.contains(&next) {
                            continue;
                        }
                        path.push(next);
                        on_path.insert(next);
                        frames.push(self.successors(next));
                    }
                    None => {
                        frames.pop();
                        if let Some(finished) = path.pop() {
                            on_path.remove(&finished);
                            done.insert(finished);
                        }
                    }
                }
            }
        }
        None
    }

    fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .inner
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        // popped from the back, so reverse to walk edges in insertion order
        next.reverse();
        next
    }

    /// Mark a file as needing its read and dependency hooks again. Contents
    /// are dropped; id, path history and edges stay.
    pub fn dirty(&mut self, id: FileId) -> Result<(), GraphError> {
        let file = self.file_mut(id)?;
        debug!(%id, path = %file.relative().display(), "marking file dirty");
        file.reset();
        file.set_parsed(false);
        Ok(())
    }

    /// Total size of all file contents in bytes.
    pub fn contents_size(&self) -> usize {
        self.files()
            .map(|file| file.contents().map_or(0, <[u8]>::len))
            .sum()
    }

    /// Serialize to the JSON string used by the on-disk cache.
    pub fn to_json(&self) -> Result<String, GraphError> {
        let started = Instant::now();
        let json = serde_json::to_string(self)?;
        debug!(bytes = json.len(), elapsed = ?started.elapsed(), "serialized graph");
        Ok(json)
    }

    /// Restore a graph produced by `to_json`.
    pub fn from_json(input: &str) -> Result<Graph, GraphError> {
        let started = Instant::now();
        let graph: Graph = serde_json::from_str(input)?;
        debug!(
            files = graph.len(),
            bytes = input.len(),
            elapsed = ?started.elapsed(),
            "restored graph"
        );
        Ok(graph)
    }
}

/// Flat, order-preserving form of a graph used for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct GraphSnapshot {
    root: PathBuf,
    files: Vec<File>,
    edges: Vec<SnapshotEdge>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEdge {
    dependency: FileId,
    dependant: FileId,
}

impl From<Graph> for GraphSnapshot {
    fn from(graph: Graph) -> Self {
        let edges = graph
            .inner
            .edge_indices()
            .filter_map(|edge| graph.inner.edge_endpoints(edge))
            .filter_map(|(from, to)| {
                Some(SnapshotEdge {
                    dependency: graph.id_at(from)?,
                    dependant: graph.id_at(to)?,
                })
            })
            .collect();
        let files = graph.files().cloned().collect();
        GraphSnapshot {
            root: graph.root,
            files,
            edges,
        }
    }
}

impl TryFrom<GraphSnapshot> for Graph {
    type Error = GraphError;

    fn try_from(snapshot: GraphSnapshot) -> Result<Self, Self::Error> {
        let mut graph = Graph::new(snapshot.root);
        for file in snapshot.files {
            if graph.has_file(file.id()) {
                return Err(GraphError::DuplicateVertex(file.id()));
            }
            graph.insert(file);
        }
        for edge in snapshot.edges {
            graph.add_dependency(edge.dependant, edge.dependency)?;
        }
        Ok(graph)
    }
}

/// A graph shared between concurrently running hooks.
///
/// Guards are plain `std::sync` guards: take them, do the graph work, drop
/// them. Never hold one across an `.await`.
#[derive(Clone, Debug)]
pub struct SharedGraph(Arc<RwLock<Graph>>);

impl SharedGraph {
    pub fn new(graph: Graph) -> Self {
        SharedGraph(Arc::new(RwLock::new(graph)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A deep copy of the current graph.
    pub fn snapshot(&self) -> Graph {
        self.read().clone()
    }

    /// Whether both handles point at the same underlying graph.
    pub fn ptr_eq(&self, other: &SharedGraph) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Graph> for SharedGraph {
    fn from(graph: Graph) -> Self {
        SharedGraph::new(graph)
    }
}
