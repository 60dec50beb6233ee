//! Structural errors raised by graph operations

use std::path::PathBuf;

use crate::model::FileId;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("file {0} already exists in the graph")]
    DuplicateVertex(FileId),

    #[error("file {0} is not in the graph")]
    UnknownVertex(FileId),

    #[error(
        "cannot remove {} while it still has dependencies in the graph (use force to override)",
        .path.display()
    )]
    NonEmptyVertex { id: FileId, path: PathBuf },

    #[error("dependency graph has a cycle through file {0}")]
    Cycle(FileId),

    #[error("graph serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
