//! MemoryStore - In-Memory NodeStore Implementation
//!
//! Keeps the four logical tables in memory behind a single `tokio::sync::RwLock`,
//! so every trait call is atomic with respect to every other call. A
//! parent -> children index is maintained alongside the node table for fast
//! child lookups.
//!
//! # Persistence
//!
//! The tables can be written to and restored from a JSON snapshot with
//! [`MemoryStore::save_snapshot`] and [`MemoryStore::load_snapshot`]. The
//! children index is derived data and is rebuilt on load.

use crate::db::{NodeStore, StoreError};
use crate::models::{
    ComponentDefinition, ComponentRef, KvEntry, Node, NodeFilter, NodeType, SearchDocument,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

/// Logical tables, serialized as-is into snapshots
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tables {
    /// Last assigned creation sequence number
    next_seq: u64,

    nodes: HashMap<String, Node>,

    /// Own entries per node, first-insertion order
    kv_entries: HashMap<String, Vec<KvEntry>>,

    /// Component definitions per node, declaration order
    components: HashMap<String, Vec<ComponentDefinition>>,

    search_documents: HashMap<String, SearchDocument>,

    /// parent id -> child ids (derived)
    #[serde(skip)]
    children: HashMap<String, Vec<String>>,
}

impl Tables {
    fn rebuild_children_index(&mut self) {
        self.children.clear();
        for node in self.nodes.values() {
            if let Some(parent_id) = &node.parent_id {
                self.children
                    .entry(parent_id.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }
    }

    fn link_child(&mut self, parent_id: &str, child_id: &str) {
        self.children
            .entry(parent_id.to_string())
            .or_default()
            .push(child_id.to_string());
    }

    fn unlink_child(&mut self, parent_id: &str, child_id: &str) {
        if let Some(ids) = self.children.get_mut(parent_id) {
            ids.retain(|id| id != child_id);
            if ids.is_empty() {
                self.children.remove(parent_id);
            }
        }
    }

    /// A node may only point at a stored parent (roots have none)
    fn check_parent(&self, node: &Node) -> Result<(), StoreError> {
        match &node.parent_id {
            Some(parent_id) if !self.nodes.contains_key(parent_id) => {
                Err(StoreError::missing_parent(&node.id, parent_id))
            }
            _ => Ok(()),
        }
    }

    /// `ids` in the given order, followed by any stored descendants they do not list
    ///
    /// Children attached after the caller collected its subtree are caught here,
    /// so a delete never leaves a node behind with a dangling parent.
    fn with_descendants(&self, ids: &[String]) -> Vec<String> {
        let mut all: Vec<String> = Vec::with_capacity(ids.len());
        let mut seen = HashSet::new();
        for id in ids {
            if seen.insert(id.clone()) {
                all.push(id.clone());
            }
        }

        let mut extra = Vec::new();
        let mut stack: Vec<String> = all.clone();
        while let Some(id) = stack.pop() {
            for child in self.children.get(&id).into_iter().flatten() {
                if seen.insert(child.clone()) {
                    extra.push(child.clone());
                    stack.push(child.clone());
                }
            }
        }
        // Late children first, the caller's children-before-parents order after
        extra.reverse();
        extra.extend(all);
        extra
    }

    /// Nodes matching `filter`, using the children index when a parent is given
    fn select(&self, filter: &NodeFilter) -> Vec<Node> {
        let candidates: Vec<&Node> = match &filter.parent_id {
            Some(parent_id) => match self.children.get(parent_id) {
                Some(ids) => ids.iter().filter_map(|id| self.nodes.get(id)).collect(),
                None => Vec::new(),
            },
            None => self.nodes.values().collect(),
        };

        let mut selected: Vec<Node> = candidates
            .into_iter()
            .filter(|node| filter.matches(node))
            .cloned()
            .collect();
        selected.sort_by_key(|node| node.creation_seq);
        selected
    }
}

/// In-memory `NodeStore`
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write all tables to `path` as JSON, creating parent directories
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let bytes = {
            let tables = self.tables.read().await;
            serde_json::to_vec_pretty(&*tables)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StoreError::io(path, e))?;

        tracing::debug!("Saved store snapshot to {}", path.display());
        Ok(())
    }

    /// Restore a store from a snapshot written by [`MemoryStore::save_snapshot`]
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let mut tables: Tables = serde_json::from_slice(&bytes)?;
        tables.rebuild_children_index();

        tracing::info!(
            "Loaded store snapshot from {} ({} nodes)",
            path.display(),
            tables.nodes.len()
        );
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Total number of stored nodes
    pub async fn node_count(&self) -> usize {
        self.tables.read().await.nodes.len()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn insert_node(&self, mut node: Node) -> Result<Node, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.nodes.contains_key(&node.id) {
            return Err(StoreError::duplicate_id(&node.id));
        }
        tables.check_parent(&node)?;

        tables.next_seq += 1;
        node.creation_seq = tables.next_seq;
        if let Some(parent_id) = node.parent_id.clone() {
            tables.link_child(&parent_id, &node.id);
        }
        tables.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.tables.read().await.nodes.get(id).cloned())
    }

    async fn update_node(&self, mut node: Node) -> Result<Node, StoreError> {
        let mut tables = self.tables.write().await;
        let (old_parent, creation_seq) = match tables.nodes.get(&node.id) {
            Some(existing) => (existing.parent_id.clone(), existing.creation_seq),
            None => return Err(StoreError::missing_node(&node.id)),
        };
        tables.check_parent(&node)?;

        node.creation_seq = creation_seq;
        if old_parent != node.parent_id {
            if let Some(old) = &old_parent {
                tables.unlink_child(old, &node.id);
            }
            if let Some(new) = node.parent_id.clone() {
                tables.link_child(&new, &node.id);
            }
        }
        tables.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError> {
        Ok(self.tables.read().await.select(filter))
    }

    async fn count_nodes(&self, filter: &NodeFilter) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.select(filter).len())
    }

    async fn delete_nodes(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let mut tables = self.tables.write().await;
        let doomed = tables.with_descendants(ids);
        let mut deleted = Vec::with_capacity(doomed.len());

        for id in &doomed {
            let Some(node) = tables.nodes.remove(id) else {
                continue;
            };
            if let Some(parent_id) = &node.parent_id {
                tables.unlink_child(parent_id, id);
            }
            tables.children.remove(id);
            tables.kv_entries.remove(id);
            tables.components.remove(id);
            tables.search_documents.remove(id);
            deleted.push(id.clone());
        }

        Ok(deleted)
    }

    async fn get_kv_entries(&self, node_id: &str) -> Result<Vec<KvEntry>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .kv_entries
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_kv_entry(&self, entry: KvEntry) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.nodes.contains_key(&entry.node_id) {
            return Err(StoreError::missing_node(&entry.node_id));
        }

        let entries = tables.kv_entries.entry(entry.node_id.clone()).or_default();
        match entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn remove_kv_entry(&self, node_id: &str, key: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(entries) = tables.kv_entries.get_mut(node_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.key != key);
        Ok(entries.len() != before)
    }

    async fn count_kv_entries(&self, node_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .kv_entries
            .get(node_id)
            .map_or(0, Vec::len))
    }

    async fn find_kv_entries_by_component(
        &self,
        component: &ComponentRef,
    ) -> Result<Vec<KvEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .kv_entries
            .values()
            .flatten()
            .filter(|e| e.component.as_ref() == Some(component))
            .cloned()
            .collect())
    }

    async fn get_components(&self, node_id: &str) -> Result<Vec<ComponentDefinition>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .components
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_component(&self, definition: ComponentDefinition) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.nodes.contains_key(&definition.node_id) {
            return Err(StoreError::missing_node(&definition.node_id));
        }

        let defs = tables
            .components
            .entry(definition.node_id.clone())
            .or_default();
        if defs.iter().any(|d| d.name == definition.name) {
            return Err(StoreError::duplicate_component(
                &definition.node_id,
                &definition.name,
            ));
        }
        defs.push(definition);
        Ok(())
    }

    async fn remove_component(&self, node_id: &str, name: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(defs) = tables.components.get_mut(node_id) else {
            return Ok(false);
        };
        let before = defs.len();
        defs.retain(|d| d.name != name);
        Ok(defs.len() != before)
    }

    async fn put_search_document(&self, document: SearchDocument) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.nodes.contains_key(&document.node_id) {
            return Err(StoreError::missing_node(&document.node_id));
        }
        tables
            .search_documents
            .insert(document.node_id.clone(), document);
        Ok(())
    }

    async fn get_search_document(
        &self,
        node_id: &str,
    ) -> Result<Option<SearchDocument>, StoreError> {
        Ok(self.tables.read().await.search_documents.get(node_id).cloned())
    }

    async fn remove_search_document(&self, node_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .search_documents
            .remove(node_id)
            .is_some())
    }

    async fn list_search_documents(
        &self,
        node_type: Option<NodeType>,
    ) -> Result<Vec<SearchDocument>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .search_documents
            .values()
            .filter(|doc| node_type.map_or(true, |t| doc.node_type == t))
            .cloned()
            .collect())
    }
}
