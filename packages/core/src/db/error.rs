//! Storage Error Types
//!
//! This module defines error types for `NodeStore` implementations, covering
//! key conflicts, missing rows, transient backend failures and snapshot I/O.

use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors
///
/// Structural rules (legal parents, cycles, KV typing) are enforced by the
/// service layer; the store only guards key uniqueness and row existence.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A node with this ID already exists
    #[error("Node already exists: {id}")]
    DuplicateId { id: String },

    /// Update targeted a node that is not stored
    #[error("Node not found in store: {id}")]
    MissingNode { id: String },

    /// Write would attach a node to a parent that is not stored
    #[error("Parent {parent_id} of node {id} not found in store")]
    MissingParent { id: String, parent_id: String },

    /// Component name already taken on this node
    #[error("Component '{name}' already defined on node {node_id}")]
    DuplicateComponent { node_id: String, name: String },

    /// Backend temporarily unable to serve the request
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    /// Failed to read or write a snapshot file
    #[error("Snapshot I/O failed for {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Snapshot (de)serialization error
    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    pub fn missing_node(id: impl Into<String>) -> Self {
        Self::MissingNode { id: id.into() }
    }

    pub fn missing_parent(id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self::MissingParent {
            id: id.into(),
            parent_id: parent_id.into(),
        }
    }

    pub fn duplicate_component(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateComponent {
            node_id: node_id.into(),
            name: name.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io { .. })
    }
}
