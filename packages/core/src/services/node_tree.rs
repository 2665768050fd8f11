//! NodeTree - Hierarchical Node Namespace
//!
//! Owns the structural rules of the forest:
//!
//! - a child's type must be accepted by its parent's type (see
//!   [`NodeType::accepts_child`])
//! - Pages never sit at the root
//! - a node can never be placed under itself or one of its descendants
//! - deleting a node deletes its whole subtree, including KV entries, component
//!   definitions and search documents
//!
//! Reads return snapshots taken at call time, never live views.

use crate::db::NodeStore;
use crate::models::{
    ComponentRef, DeleteResult, NewNode, Node, NodeFilter, NodeKind, NodeType, ValidationError,
};
use crate::services::NodeServiceError;
use std::collections::HashSet;
use std::sync::Arc;

/// Structural operations over the node store
#[derive(Clone)]
pub struct NodeTree {
    store: Arc<dyn NodeStore>,
}

impl NodeTree {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Create a node under `parent_id` (or as a root when `None`)
    ///
    /// For a Page created under a Document, `document_id` is set to the parent.
    ///
    /// # Errors
    ///
    /// - `InvalidParent` if the parent does not exist, cannot own this node type,
    ///   or a Page is created without a parent
    /// - `Validation` if the node is structurally invalid (e.g. page number 0)
    pub async fn create(
        &self,
        parent_id: Option<&str>,
        new_node: NewNode,
    ) -> Result<Node, NodeServiceError> {
        let node_type = new_node.node_type();
        let mut kind = new_node.kind;

        match parent_id {
            Some(parent_id) => {
                let parent = self.store.get_node(parent_id).await?.ok_or_else(|| {
                    NodeServiceError::invalid_parent(parent_id, "parent does not exist")
                })?;
                Self::check_child_allowed(&parent, node_type)?;

                if let NodeKind::Page(page) = &mut kind {
                    page.document_id = (parent.node_type() == NodeType::Document)
                        .then(|| parent.id.clone());
                    if page.document_id.is_some()
                        && self.page_numbers(parent_id).await?.contains(&page.page_number)
                    {
                        return Err(ValidationError::DuplicatePageNumber(page.page_number).into());
                    }
                }
            }
            None if !node_type.can_be_root() => {
                return Err(NodeServiceError::invalid_parent(
                    "<root>",
                    format!("a {} must have a parent", node_type),
                ));
            }
            None => {}
        }

        let node = Node::new(parent_id.map(str::to_string), new_node.title, kind);
        node.validate()?;

        let created = self.store.insert_node(node).await?;
        tracing::debug!(
            "Created {} {} under {:?}",
            created.node_type(),
            created.id,
            created.parent_id
        );
        Ok(created)
    }

    /// Get node by ID
    ///
    /// # Errors
    ///
    /// `NotFound` if absent.
    pub async fn get(&self, id: &str) -> Result<Node, NodeServiceError> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| NodeServiceError::node_not_found(id))
    }

    /// Get a node and require it to be a Document
    pub async fn get_document(&self, id: &str) -> Result<Node, NodeServiceError> {
        let node = self.get(id).await?;
        match node.node_type() {
            NodeType::Document => Ok(node),
            other => Err(NodeServiceError::wrong_node_type(id, NodeType::Document, other)),
        }
    }

    /// Children of `id` in creation order (snapshot)
    pub async fn children(&self, id: &str) -> Result<Vec<Node>, NodeServiceError> {
        self.ensure_exists(id).await?;
        Ok(self
            .store
            .find_nodes(&NodeFilter::new().with_parent_id(id))
            .await?)
    }

    /// Children of `id` restricted to one type, in creation order
    pub async fn children_of_type(
        &self,
        id: &str,
        node_type: NodeType,
    ) -> Result<Vec<Node>, NodeServiceError> {
        self.ensure_exists(id).await?;
        Ok(self
            .store
            .find_nodes(&NodeFilter::new().with_parent_id(id).with_node_type(node_type))
            .await?)
    }

    /// Ancestors of `id`, nearest first (the node itself excluded)
    pub async fn ancestors(&self, id: &str) -> Result<Vec<Node>, NodeServiceError> {
        let mut current = self.get(id).await?;
        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([current.id.clone()]);

        while let Some(parent_id) = current.parent_id.clone() {
            if !seen.insert(parent_id.clone()) {
                // Corrupt store; stop rather than loop forever
                tracing::error!("Parent cycle detected at node {}", parent_id);
                break;
            }
            let parent = self.get(&parent_id).await?;
            ancestors.push(parent.clone());
            current = parent;
        }

        Ok(ancestors)
    }

    /// IDs of every descendant of `id`, each listed before its own descendants
    /// (the node itself excluded)
    pub async fn descendant_ids(&self, id: &str) -> Result<Vec<String>, NodeServiceError> {
        let mut result = Vec::new();
        let mut frontier = vec![id.to_string()];

        while let Some(current) = frontier.pop() {
            let children = self
                .store
                .find_nodes(&NodeFilter::new().with_parent_id(&current))
                .await?;
            for child in children {
                frontier.push(child.id.clone());
                result.push(child.id);
            }
        }

        Ok(result)
    }

    /// Number of nodes matching `filter`
    pub async fn count(&self, filter: &NodeFilter) -> Result<usize, NodeServiceError> {
        Ok(self.store.count_nodes(filter).await?)
    }

    /// Persist an already-existing node (used for authored and derived field updates)
    pub async fn save(&self, mut node: Node) -> Result<Node, NodeServiceError> {
        node.validate()?;
        node.touch();
        Ok(self.store.update_node(node).await?)
    }

    /// Move `id` under `new_parent_id`
    ///
    /// # Errors
    ///
    /// - `CycleDetected` if the new parent is the node itself or a descendant
    /// - `InvalidParent` if the new parent is missing or cannot own this type
    pub async fn move_node(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node, NodeServiceError> {
        let mut node = self.get(id).await?;

        match new_parent_id {
            Some(parent_id) => {
                if parent_id == id || self.descendant_ids(id).await?.iter().any(|d| d == parent_id)
                {
                    return Err(NodeServiceError::cycle_detected(id, parent_id));
                }
                let parent = self.store.get_node(parent_id).await?.ok_or_else(|| {
                    NodeServiceError::invalid_parent(parent_id, "parent does not exist")
                })?;
                Self::check_child_allowed(&parent, node.node_type())?;

                let joins_document = parent.node_type() == NodeType::Document
                    && node.parent_id.as_deref() != Some(parent_id);
                let next_number = if joins_document {
                    self.page_numbers(parent_id).await?.into_iter().max().unwrap_or(0) + 1
                } else {
                    0
                };
                if let Some(page) = node.as_page_mut() {
                    page.document_id = (parent.node_type() == NodeType::Document)
                        .then(|| parent.id.clone());
                    // Appended after the target's pages so numbers stay unique
                    if joins_document {
                        page.page_number = next_number;
                    }
                }
            }
            None if !node.node_type().can_be_root() => {
                return Err(NodeServiceError::invalid_parent(
                    "<root>",
                    format!("a {} must have a parent", node.node_type()),
                ));
            }
            None => {}
        }

        node.parent_id = new_parent_id.map(str::to_string);
        let moved = self.save(node).await?;
        tracing::debug!("Moved node {} under {:?}", moved.id, moved.parent_id);
        Ok(moved)
    }

    /// Delete `id` and its whole subtree
    ///
    /// KV entries, component definitions and search documents of every removed
    /// node go with it.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `id` does not exist (retrying a completed delete is safe)
    /// - `ComponentInUse` if a node outside the subtree still has own keys typed by
    ///   a component declared inside it
    pub async fn delete(&self, id: &str) -> Result<DeleteResult, NodeServiceError> {
        self.ensure_exists(id).await?;

        let mut subtree = vec![id.to_string()];
        subtree.extend(self.descendant_ids(id).await?);
        self.check_components_releasable(&subtree).await?;

        // Children before parents
        subtree.reverse();
        let deleted_ids = self.store.delete_nodes(&subtree).await?;

        tracing::debug!("Deleted {} node(s) rooted at {}", deleted_ids.len(), id);
        Ok(DeleteResult { deleted_ids })
    }

    /// Page numbers in use under `document_id`
    async fn page_numbers(&self, document_id: &str) -> Result<HashSet<u32>, NodeServiceError> {
        Ok(self
            .children_of_type(document_id, NodeType::Page)
            .await?
            .iter()
            .filter_map(|page| page.as_page().map(|attrs| attrs.page_number))
            .collect())
    }

    async fn ensure_exists(&self, id: &str) -> Result<(), NodeServiceError> {
        self.get(id).await.map(|_| ())
    }

    fn check_child_allowed(parent: &Node, child: NodeType) -> Result<(), NodeServiceError> {
        if parent.node_type().accepts_child(child) {
            Ok(())
        } else {
            Err(NodeServiceError::invalid_parent(
                &parent.id,
                format!("a {} cannot contain a {}", parent.node_type(), child),
            ))
        }
    }

    /// Reject the delete if a surviving node references a component declared in
    /// the subtree
    async fn check_components_releasable(
        &self,
        subtree: &[String],
    ) -> Result<(), NodeServiceError> {
        let doomed: HashSet<&str> = subtree.iter().map(String::as_str).collect();

        for node_id in subtree {
            for component in self.store.get_components(node_id).await? {
                let reference = ComponentRef {
                    node_id: node_id.clone(),
                    name: component.name.clone(),
                };
                let survivors: HashSet<String> = self
                    .store
                    .find_kv_entries_by_component(&reference)
                    .await?
                    .into_iter()
                    .map(|entry| entry.node_id)
                    .filter(|owner| !doomed.contains(owner.as_str()))
                    .collect();

                if !survivors.is_empty() {
                    return Err(NodeServiceError::component_in_use(
                        node_id,
                        component.name,
                        survivors.len(),
                    ));
                }
            }
        }
        Ok(())
    }
}
