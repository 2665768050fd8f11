//! NodeStore Trait - Storage Abstraction Layer
//!
//! This module defines the `NodeStore` trait that abstracts persistence of the
//! four logical tables (nodes, KV entries, component definitions, search
//! documents). Services hold an `Arc<dyn NodeStore>` and never touch a backend
//! directly.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: All methods are async so that embedded and networked
//!    backends fit behind the same trait
//! 2. **Ownership Semantics**: Methods take ownership of rows being written
//! 3. **Atomic Calls**: Each call is atomic; `delete_nodes` removes nodes and every
//!    row referencing them in one step
//! 4. **No Business Rules**: Legal parents, cycles and KV typing are checked by the
//!    services before calling the store
//!
//! # Examples
//!
//! ```rust,no_run
//! use docutree_core::db::{MemoryStore, NodeStore};
//! use docutree_core::models::{FolderAttrs, Node, NodeKind};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
//!
//!     let folder = Node::new(None, "Inbox", NodeKind::Folder(FolderAttrs::default()));
//!     let created = store.insert_node(folder).await?;
//!     println!("Created node #{}: {}", created.creation_seq, created.id);
//!
//!     Ok(())
//! }
//! ```

use crate::db::StoreError;
use crate::models::{
    ComponentDefinition, ComponentRef, KvEntry, Node, NodeFilter, NodeType, SearchDocument,
};
use async_trait::async_trait;

/// Abstraction layer for persistence operations
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; services share one store across
/// concurrent requests and the background normalization worker.
///
/// # Method Categories
///
/// - **Nodes**: insert, get, update, find, count, cascading delete
/// - **KV entries**: per-node own entries with last-write-wins
/// - **Components**: per-node named schemas
/// - **Search documents**: one derived document per node
#[async_trait]
pub trait NodeStore: Send + Sync {
    //
    // NODES
    //

    /// Insert a new node, assigning its `creation_seq`
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateId` if a node with the same id exists
    /// - `StoreError::MissingParent` if `parent_id` names a node that is not stored
    async fn insert_node(&self, node: Node) -> Result<Node, StoreError>;

    /// Get node by ID; `Ok(None)` when absent
    async fn get_node(&self, id: &str) -> Result<Option<Node>, StoreError>;

    /// Replace a stored node (id and `creation_seq` are preserved)
    ///
    /// # Errors
    ///
    /// - `StoreError::MissingNode` if the node is not stored
    /// - `StoreError::MissingParent` if `parent_id` names a node that is not stored
    async fn update_node(&self, node: Node) -> Result<Node, StoreError>;

    /// All nodes matching `filter`, ordered by creation
    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError>;

    /// Number of nodes matching `filter`
    async fn count_nodes(&self, filter: &NodeFilter) -> Result<usize, StoreError>;

    /// Delete the given nodes together with their KV entries, component
    /// definitions and search documents
    ///
    /// Stored descendants of the given nodes go too, even when not listed. Ids
    /// that are not stored are skipped. Returns the ids actually removed.
    async fn delete_nodes(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;

    //
    // KV ENTRIES
    //

    /// Own entries of a node, in first-insertion order
    async fn get_kv_entries(&self, node_id: &str) -> Result<Vec<KvEntry>, StoreError>;

    /// Insert or overwrite `(entry.node_id, entry.key)`; an overwrite keeps the
    /// key's original position
    async fn put_kv_entry(&self, entry: KvEntry) -> Result<(), StoreError>;

    /// Remove one own entry; returns whether it existed
    async fn remove_kv_entry(&self, node_id: &str, key: &str) -> Result<bool, StoreError>;

    /// Number of own entries on a node
    async fn count_kv_entries(&self, node_id: &str) -> Result<usize, StoreError>;

    /// All own entries (on any node) whose schema reference is `component`
    async fn find_kv_entries_by_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Vec<KvEntry>, StoreError>;

    //
    // COMPONENTS
    //

    /// Component definitions declared on a node, in declaration order
    async fn get_components(&self, node_id: &str) -> Result<Vec<ComponentDefinition>, StoreError>;

    /// # Errors
    ///
    /// `StoreError::DuplicateComponent` if the name is taken on that node.
    async fn insert_component(&self, definition: ComponentDefinition) -> Result<(), StoreError>;

    /// Remove a component definition; returns whether it existed
    async fn remove_component(&self, node_id: &str, name: &str) -> Result<bool, StoreError>;

    //
    // SEARCH DOCUMENTS
    //

    /// Insert or replace the document for `document.node_id`
    async fn put_search_document(&self, document: SearchDocument) -> Result<(), StoreError>;

    async fn get_search_document(&self, node_id: &str)
        -> Result<Option<SearchDocument>, StoreError>;

    /// Returns whether a document existed
    async fn remove_search_document(&self, node_id: &str) -> Result<bool, StoreError>;

    /// Snapshot of all search documents, optionally limited to one node type
    async fn list_search_documents(
        &self,
        node_type: Option<NodeType>,
    ) -> Result<Vec<SearchDocument>, StoreError>;
}
