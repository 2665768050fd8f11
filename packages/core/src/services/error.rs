//! Service Layer Error Types
//!
//! This module defines the error taxonomy shared by NodeTree, KvStore,
//! SearchIndex and the normalization pipeline. Every variant is reportable;
//! none is process-fatal.

use crate::db::StoreError;
use crate::models::{KvType, NodeType, ValidationError};
use thiserror::Error;

/// Service operation errors
#[derive(Error, Debug)]
pub enum NodeServiceError {
    /// Referenced node or component is absent
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Parent missing or not allowed to own a child of this type
    #[error("Invalid parent {parent_id}: {reason}")]
    InvalidParent { parent_id: String, reason: String },

    /// Proposed parent is the node itself or one of its descendants
    #[error("Cycle detected: cannot place {node_id} under {parent_id}")]
    CycleDetected { node_id: String, parent_id: String },

    /// KV value does not match the type a component declares for the key
    #[error("Type mismatch for key '{key}': expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: KvType,
        actual: String,
    },

    /// Component name already defined on the node
    #[error("Component '{name}' already defined on node {node_id}")]
    DuplicateComponent { node_id: String, name: String },

    /// Component still referenced by a live node's own keys
    #[error("Component '{name}' on node {node_id} is still referenced by {referencing_nodes} node(s)")]
    ComponentInUse {
        node_id: String,
        name: String,
        referencing_nodes: usize,
    },

    /// Operation requires a node of another type
    #[error("Node {id} is a {actual}, expected a {expected}")]
    WrongNodeType {
        id: String,
        expected: NodeType,
        actual: NodeType,
    },

    /// Node failed structural validation
    #[error("Node validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Normalization could not complete; re-running is safe
    #[error("Normalization of document {document_id} failed: {reason}")]
    NormalizationFailure { document_id: String, reason: String },

    /// Storage layer error
    #[error("Storage operation failed: {0}")]
    Store(#[from] StoreError),
}

impl NodeServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn node_not_found(id: &str) -> Self {
        Self::not_found(format!("node {}", id))
    }

    pub fn invalid_parent(parent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParent {
            parent_id: parent_id.into(),
            reason: reason.into(),
        }
    }

    pub fn cycle_detected(node_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self::CycleDetected {
            node_id: node_id.into(),
            parent_id: parent_id.into(),
        }
    }

    pub fn type_mismatch(
        key: impl Into<String>,
        expected: KvType,
        value: &serde_json::Value,
    ) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected,
            actual: value.to_string(),
        }
    }

    pub fn duplicate_component(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateComponent {
            node_id: node_id.into(),
            name: name.into(),
        }
    }

    pub fn component_in_use(
        node_id: impl Into<String>,
        name: impl Into<String>,
        referencing_nodes: usize,
    ) -> Self {
        Self::ComponentInUse {
            node_id: node_id.into(),
            name: name.into(),
            referencing_nodes,
        }
    }

    pub fn wrong_node_type(id: impl Into<String>, expected: NodeType, actual: NodeType) -> Self {
        Self::WrongNodeType {
            id: id.into(),
            expected,
            actual,
        }
    }

    pub fn normalization_failure(
        document_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::NormalizationFailure {
            document_id: document_id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether re-running the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NormalizationFailure { .. } => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}
