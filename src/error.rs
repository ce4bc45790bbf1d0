use std::path::PathBuf;

use thiserror::Error;

/// Failure to build one hull segment. The previous mesh stays on screen.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("segment between z={front} and z={back} has zero length")]
    ZeroLengthSegment { front: f32, back: f32 },
    #[error("front section (z={front}) lies behind back section (z={back})")]
    InvertedSegment { front: f32, back: f32 },
    #[error("section needs at least 2 nodes, found {found}")]
    TooFewNodes { found: usize },
    #[error("section nodes must be strictly ascending in y (node {index})")]
    UnsortedNodes { index: usize },
    #[error("node {index} lies on the mirrored side (x < 0)")]
    NegativeX { index: usize },
    #[error("front section has {front} nodes but back section has {back}")]
    NodeCountMismatch { front: usize, back: usize },
}

/// Picking is best effort: these never leave the picking pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PickError {
    #[error("pick record buffer overflow ({hits} hits, capacity {capacity})")]
    Overflow { hits: usize, capacity: usize },
    #[error("rendering resources unavailable: {0}")]
    ResourceUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("unknown or stale handle")]
    StaleHandle,
    #[error("a section already exists at z={0}")]
    DuplicateZ(f32),
    #[error("a section group keeps at least {0} sections")]
    TooFewSections(usize),
    #[error("node {index} cannot be removed (sections need 3 nodes and only interior nodes are removable)")]
    NodeNotRemovable { index: usize },
    #[error("node index {0} out of range")]
    NodeOutOfRange(usize),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("failed to read project {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed project {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid section group {group}: {source}")]
    InvalidGroup {
        group: usize,
        #[source]
        source: EditError,
    },
}
