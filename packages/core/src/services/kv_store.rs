//! KvStore - Per-Node Key/Value Metadata
//!
//! Provides own keys and component-based inheritance on top of the node tree.
//!
//! # Resolution
//!
//! `resolve(node)` walks from the root down to `node`, laying each node's
//! component fields over the mapping built so far, then lays the node's own
//! keys on top. The effective precedence is therefore:
//!
//! 1. own keys of the node
//! 2. components declared on the nearest node (the node itself, then its parent, ...)
//! 3. components declared further up
//!
//! Within one node, a later-declared component overrides an earlier one.
//!
//! # Typing
//!
//! `add` type-checks a value against the component field that would resolve for
//! that key. The entry remembers which component typed it; that reference keeps
//! the component alive until [`KvStore::detach_component`] migrates it away.

use crate::db::NodeStore;
use crate::models::{
    ComponentDefinition, ComponentField, ComponentRef, KvEntry, KvSource, KvType, ResolvedEntry,
    ResolvedKv, ValidationError,
};
use crate::services::{KeyedLocks, NodeServiceError, NodeTree};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Key/value metadata service
#[derive(Clone)]
pub struct KvStore {
    tree: NodeTree,
    locks: Arc<KeyedLocks>,
}

impl KvStore {
    pub fn new(tree: NodeTree) -> Self {
        Self {
            tree,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Declare a named component schema on `node_id`
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node does not exist
    /// - `DuplicateComponent` if `name` is already declared on this node
    /// - `Validation` if the schema repeats a key
    /// - `TypeMismatch` if a field's default value does not match its type
    pub async fn define_component(
        &self,
        node_id: &str,
        name: &str,
        fields: Vec<ComponentField>,
    ) -> Result<ComponentDefinition, NodeServiceError> {
        self.tree.get(node_id).await?;

        let mut keys = HashSet::new();
        for field in &fields {
            if !keys.insert(field.key.as_str()) {
                return Err(ValidationError::DuplicateKey(field.key.clone()).into());
            }
            if !field.kv_type.accepts(&field.value) {
                return Err(NodeServiceError::type_mismatch(
                    &field.key,
                    field.kv_type,
                    &field.value,
                ));
            }
        }

        let definition = ComponentDefinition {
            node_id: node_id.to_string(),
            name: name.to_string(),
            fields,
        };

        let _guard = self.locks.lock(node_id).await;
        if self
            .tree
            .store()
            .get_components(node_id)
            .await?
            .iter()
            .any(|c| c.name == name)
        {
            return Err(NodeServiceError::duplicate_component(node_id, name));
        }
        self.tree
            .store()
            .insert_component(definition.clone())
            .await?;

        tracing::debug!(
            "Defined component '{}' with {} field(s) on node {}",
            name,
            definition.fields.len(),
            node_id
        );
        Ok(definition)
    }

    /// Set an own key on `node_id` (last write wins)
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node does not exist
    /// - `TypeMismatch` if a component in scope types `key` and `value` does not conform
    pub async fn add(
        &self,
        node_id: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<KvEntry, NodeServiceError> {
        let value = value.into();
        let _guard = self.locks.lock(node_id).await;

        let (component, kv_type) = match self.lookup_field(node_id, key).await? {
            Some((reference, kv_type)) => {
                if !kv_type.accepts(&value) {
                    return Err(NodeServiceError::type_mismatch(key, kv_type, &value));
                }
                (Some(reference), Some(kv_type))
            }
            None => (None, None),
        };

        let entry = KvEntry {
            node_id: node_id.to_string(),
            key: key.to_string(),
            value,
            kv_type,
            component,
        };
        self.tree.store().put_kv_entry(entry.clone()).await?;
        Ok(entry)
    }

    /// Set an own key without a value
    pub async fn add_key(&self, node_id: &str, key: &str) -> Result<KvEntry, NodeServiceError> {
        self.add(node_id, key, Value::Null).await
    }

    /// Remove an own key; returns whether it existed
    pub async fn remove(&self, node_id: &str, key: &str) -> Result<bool, NodeServiceError> {
        self.tree.get(node_id).await?;
        let _guard = self.locks.lock(node_id).await;
        Ok(self.tree.store().remove_kv_entry(node_id, key).await?)
    }

    /// Own entries of a node, in first-insertion order
    pub async fn own_entries(&self, node_id: &str) -> Result<Vec<KvEntry>, NodeServiceError> {
        self.tree.get(node_id).await?;
        Ok(self.tree.store().get_kv_entries(node_id).await?)
    }

    /// Number of own entries (inherited component keys are not counted)
    pub async fn count(&self, node_id: &str) -> Result<usize, NodeServiceError> {
        self.tree.get(node_id).await?;
        Ok(self.tree.store().count_kv_entries(node_id).await?)
    }

    /// Components declared directly on `node_id`
    pub async fn components(
        &self,
        node_id: &str,
    ) -> Result<Vec<ComponentDefinition>, NodeServiceError> {
        self.tree.get(node_id).await?;
        Ok(self.tree.store().get_components(node_id).await?)
    }

    /// Effective key/value mapping of `node_id`
    pub async fn resolve(&self, node_id: &str) -> Result<ResolvedKv, NodeServiceError> {
        let store = self.tree.store();

        // Root first, node itself last
        let mut chain: Vec<String> = self
            .tree
            .ancestors(node_id)
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect();
        chain.reverse();
        chain.push(node_id.to_string());

        let mut resolved = ResolvedKv::new();
        for id in &chain {
            for component in store.get_components(id).await? {
                for field in component.fields {
                    resolved.overlay(ResolvedEntry {
                        key: field.key,
                        value: field.value,
                        kv_type: Some(field.kv_type),
                        source: KvSource::Component {
                            node_id: component.node_id.clone(),
                            name: component.name.clone(),
                        },
                    });
                }
            }
        }

        for entry in store.get_kv_entries(node_id).await? {
            resolved.overlay(ResolvedEntry {
                key: entry.key,
                value: entry.value,
                kv_type: entry.kv_type,
                source: KvSource::Own,
            });
        }

        Ok(resolved)
    }

    /// Remove a component definition
    ///
    /// # Errors
    ///
    /// - `NotFound` if no such component is declared on the node
    /// - `ComponentInUse` while any own key still references it
    pub async fn remove_component(&self, node_id: &str, name: &str) -> Result<(), NodeServiceError> {
        let reference = ComponentRef {
            node_id: node_id.to_string(),
            name: name.to_string(),
        };
        let _guard = self.locks.lock(node_id).await;

        let referencing = self.referencing_nodes(&reference).await?;
        if referencing > 0 {
            return Err(NodeServiceError::component_in_use(node_id, name, referencing));
        }

        if !self.tree.store().remove_component(node_id, name).await? {
            return Err(NodeServiceError::not_found(format!(
                "component '{}' on node {}",
                name, node_id
            )));
        }
        tracing::debug!("Removed component '{}' from node {}", name, node_id);
        Ok(())
    }

    /// Migration step: turn every own key typed by this component into an
    /// untyped own key, releasing the reference
    ///
    /// Returns the number of entries rewritten.
    pub async fn detach_component(
        &self,
        node_id: &str,
        name: &str,
    ) -> Result<usize, NodeServiceError> {
        let reference = ComponentRef {
            node_id: node_id.to_string(),
            name: name.to_string(),
        };

        let entries = self
            .tree
            .store()
            .find_kv_entries_by_component(&reference)
            .await?;
        let mut rewritten = 0;
        for mut entry in entries {
            let _guard = self.locks.lock(&entry.node_id).await;
            entry.component = None;
            entry.kv_type = None;
            self.tree.store().put_kv_entry(entry).await?;
            rewritten += 1;
        }

        if rewritten > 0 {
            tracing::info!(
                "Detached {} own key(s) from component '{}' on node {}",
                rewritten,
                name,
                node_id
            );
        }
        Ok(rewritten)
    }

    /// Component field that types `key` for `node_id`, nearest declaration first
    async fn lookup_field(
        &self,
        node_id: &str,
        key: &str,
    ) -> Result<Option<(ComponentRef, KvType)>, NodeServiceError> {
        let store = self.tree.store();

        let mut chain = vec![self.tree.get(node_id).await?.id];
        chain.extend(self.tree.ancestors(node_id).await?.into_iter().map(|n| n.id));

        for id in &chain {
            let components = store.get_components(id).await?;
            // Later declarations override earlier ones on the same node
            for component in components.iter().rev() {
                if let Some(field) = component.field(key) {
                    return Ok(Some((component.reference(), field.kv_type)));
                }
            }
        }
        Ok(None)
    }

    async fn referencing_nodes(&self, reference: &ComponentRef) -> Result<usize, NodeServiceError> {
        let nodes: HashSet<String> = self
            .tree
            .store()
            .find_kv_entries_by_component(reference)
            .await?
            .into_iter()
            .map(|e| e.node_id)
            .collect();
        Ok(nodes.len())
    }
}
