//! DocumentService - Ingress Facade
//!
//! The entry point used by the document-authoring side of the system. It wires
//! the tree, the KV store and the search index together and makes every
//! normalization trigger explicit: each call that changes a Document's page
//! count, title or language submits a [`NormalizeJob`] through the configured
//! [`JobSubmitter`] and returns without waiting for it.
//!
//! Folders, Documents and explicitly created Pages are indexed synchronously;
//! Pages created by normalization are indexed by the pipeline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use docutree_core::db::MemoryStore;
//! use docutree_core::services::{DocumentService, NewDocument, PendingJobs};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let jobs = PendingJobs::new();
//!     let service = DocumentService::from_store(
//!         Arc::new(MemoryStore::new()),
//!         Default::default(),
//!         Arc::new(jobs.clone()),
//!     );
//!
//!     service
//!         .create_document(NewDocument::new("kyuss.pdf", "ENG", "kyuss.pdf", 1222, 3))
//!         .await?;
//!
//!     // Offline mode: run the recorded job directly
//!     for job in jobs.drain() {
//!         service.pipeline().normalize(&job.document_id).await?;
//!     }
//!     assert_eq!(service.search("kyuss").await?.len(), 3);
//!     Ok(())
//! }
//! ```

use crate::db::NodeStore;
use crate::models::{
    ComponentDefinition, ComponentField, DeleteResult, DocumentAttrs, DocumentUpdate, KvEntry,
    NewNode, Node, NodeFilter, NodeType, PageAttrs, ResolvedKv, SearchConfig, SearchHit,
};
use crate::services::{
    JobSubmitter, KvStore, NodeServiceError, NodeTree, NormalizationPipeline, NormalizeJob,
    SearchIndex,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Parameters for creating a Document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    pub lang: String,

    pub file_name: String,

    pub size_bytes: u64,

    pub declared_page_count: u32,

    /// Containing Folder; `None` creates a root Document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl NewDocument {
    pub fn new(
        title: impl Into<String>,
        lang: impl Into<String>,
        file_name: impl Into<String>,
        size_bytes: u64,
        declared_page_count: u32,
    ) -> Self {
        Self {
            title: title.into(),
            owner: None,
            lang: lang.into(),
            file_name: file_name.into(),
            size_bytes,
            declared_page_count,
            parent_id: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.parent_id = Some(folder_id.into());
        self
    }
}

/// Facade over NodeTree, KvStore, SearchIndex and the normalization trigger
#[derive(Clone)]
pub struct DocumentService {
    pipeline: NormalizationPipeline,
    kv: KvStore,
    jobs: Arc<dyn JobSubmitter>,
}

impl DocumentService {
    /// Build the facade around an existing pipeline
    ///
    /// # Arguments
    /// * `pipeline` - Shared with the processor executing jobs, so both use the
    ///   same per-document locks
    /// * `jobs` - Where normalization jobs are submitted
    pub fn new(pipeline: NormalizationPipeline, jobs: Arc<dyn JobSubmitter>) -> Self {
        let kv = KvStore::new(pipeline.tree().clone());
        Self { pipeline, kv, jobs }
    }

    pub fn from_store(
        store: Arc<dyn NodeStore>,
        search: SearchConfig,
        jobs: Arc<dyn JobSubmitter>,
    ) -> Self {
        Self::new(NormalizationPipeline::from_store(store, search), jobs)
    }

    pub fn tree(&self) -> &NodeTree {
        self.pipeline.tree()
    }

    pub fn index(&self) -> &SearchIndex {
        self.pipeline.index()
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    pub fn pipeline(&self) -> &NormalizationPipeline {
        &self.pipeline
    }

    // ===== Nodes =====

    pub async fn create_folder(
        &self,
        parent_id: Option<&str>,
        title: &str,
        notes: &str,
    ) -> Result<Node, NodeServiceError> {
        let folder = self
            .tree()
            .create(parent_id, NewNode::folder(title).with_notes(notes))
            .await?;
        self.index().index(&folder).await?;
        Ok(folder)
    }

    /// Create a Document and submit its first normalization job
    ///
    /// Returns as soon as the Document exists; its Pages appear once the job runs.
    pub async fn create_document(&self, new_doc: NewDocument) -> Result<Node, NodeServiceError> {
        let mut attrs = DocumentAttrs::new(
            new_doc.lang,
            new_doc.file_name,
            new_doc.size_bytes,
            new_doc.declared_page_count,
        );
        attrs.owner = new_doc.owner;

        let document = self
            .tree()
            .create(
                new_doc.parent_id.as_deref(),
                NewNode::document(new_doc.title, attrs),
            )
            .await?;
        self.index().index(&document).await?;

        tracing::info!(
            "Created document {} ({} declared pages)",
            document.id,
            new_doc.declared_page_count
        );
        self.jobs.submit(NormalizeJob::new(document.id.clone()));
        Ok(document)
    }

    /// Apply an authored update to a Document
    ///
    /// A normalization job is submitted only when the title, language or declared
    /// page count actually changed.
    pub async fn update_document(
        &self,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<Node, NodeServiceError> {
        let _guard = self.pipeline.lock_document(id).await;

        let mut document = self.tree().get_document(id).await?;
        if update.is_empty() {
            return Ok(document);
        }

        let mut needs_normalization = false;
        if let Some(title) = update.title {
            needs_normalization |= document.title != title;
            document.title = title;
        }
        if let Some(attrs) = document.as_document_mut() {
            if let Some(lang) = update.lang {
                needs_normalization |= attrs.lang != lang;
                attrs.lang = lang;
            }
            if let Some(count) = update.declared_page_count {
                needs_normalization |= attrs.declared_page_count != count;
                attrs.declared_page_count = count;
            }
            if let Some(notes) = update.notes {
                attrs.notes = notes;
            }
            if let Some(text) = update.text {
                attrs.text = text;
            }
        }

        let document = self.tree().save(document).await?;
        self.index().index(&document).await?;

        if needs_normalization {
            self.jobs.submit(NormalizeJob::new(document.id.clone()));
        }
        Ok(document)
    }

    /// Append a Page after the current highest page number
    ///
    /// The Page gets its derived attributes immediately and the Document's
    /// declared page count grows by one, so a later normalization keeps it.
    pub async fn create_page(&self, document_id: &str, text: &str) -> Result<Node, NodeServiceError> {
        let _guard = self.pipeline.lock_document(document_id).await;

        let document = self.tree().get_document(document_id).await?;
        let next_number = self
            .tree()
            .children_of_type(document_id, NodeType::Page)
            .await?
            .iter()
            .filter_map(|page| page.as_page().map(|attrs| attrs.page_number))
            .max()
            .unwrap_or(0)
            + 1;

        let lang = document
            .as_document()
            .map(|attrs| attrs.lang.clone())
            .unwrap_or_default();
        let attrs = PageAttrs {
            lang,
            norm_doc_title: document.title.clone(),
            ..PageAttrs::new(next_number, text)
        };
        let page = self
            .tree()
            .create(Some(document_id), NewNode::page(attrs))
            .await?;
        self.index().index(&page).await?;
        self.shift_declared_count(document_id, 1).await?;

        tracing::debug!("Appended page {} to document {}", next_number, document_id);
        Ok(page)
    }

    /// Replace a Page's extracted text and reindex it
    ///
    /// Runs under the owning Document's lock so a concurrent normalization never
    /// writes back a stale copy of the page.
    pub async fn set_page_text(&self, page_id: &str, text: &str) -> Result<Node, NodeServiceError> {
        let page = self.tree().get(page_id).await?;
        if page.node_type() != NodeType::Page {
            return Err(NodeServiceError::wrong_node_type(
                page_id,
                NodeType::Page,
                page.node_type(),
            ));
        }

        let (_guard, mut page) = self.lock_page(page_id).await?;
        if let Some(attrs) = page.as_page_mut() {
            attrs.text = text.to_string();
        }

        let page = self.tree().save(page).await?;
        self.index().index(&page).await?;
        Ok(page)
    }

    /// Move a node, resubmitting normalization for every Document it leaves or joins
    ///
    /// A Page changing Document is appended after the target's pages, and both
    /// declared page counts follow it so neither normalization run undoes the move.
    pub async fn move_node(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node, NodeServiceError> {
        let before = self.tree().get(id).await?;
        if before.node_type() != NodeType::Page {
            return self.tree().move_node(id, new_parent_id).await;
        }

        let target_key = match new_parent_id {
            Some(parent_id) => match self.tree().get(parent_id).await {
                Ok(parent) if parent.node_type() == NodeType::Document => Some(parent.id),
                _ => None,
            },
            None => None,
        };

        // Both owners locked; retry if the page changed owner while we waited
        let (_guards, before) = loop {
            let current = self.tree().get(id).await?;
            let source_key = Self::owner_lock_key(&current);
            let guards = self
                .lock_documents(std::iter::once(source_key.clone()).chain(target_key.clone()))
                .await;
            let current = self.tree().get(id).await?;
            if Self::owner_lock_key(&current) == source_key {
                break (guards, current);
            }
        };

        let moved = self.tree().move_node(id, new_parent_id).await?;

        let old_doc = before.as_page().and_then(|p| p.document_id.clone());
        let new_doc = moved.as_page().and_then(|p| p.document_id.clone());
        if old_doc != new_doc {
            if let Some(document_id) = &old_doc {
                self.shift_declared_count(document_id, -1).await?;
            }
            if let Some(document_id) = &new_doc {
                self.shift_declared_count(document_id, 1).await?;
            }
            for document_id in old_doc.into_iter().chain(new_doc) {
                self.jobs.submit(NormalizeJob::new(document_id));
            }
        }
        Ok(moved)
    }

    /// Delete a node and its subtree
    ///
    /// Every Document in the subtree is locked first, so no normalization run is
    /// adding Pages underneath while it goes.
    pub async fn delete_node(&self, id: &str) -> Result<DeleteResult, NodeServiceError> {
        let target = self.tree().get(id).await?;

        let mut keys = vec![Self::owner_lock_key(&target)];
        if target.node_type() == NodeType::Folder {
            for descendant in self.tree().descendant_ids(id).await? {
                if let Some(node) = self.tree().store().get_node(&descendant).await? {
                    if node.node_type() == NodeType::Document {
                        keys.push(node.id);
                    }
                }
            }
        }

        let _guards = self.lock_documents(keys).await;
        self.tree().delete(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Node, NodeServiceError> {
        self.tree().get(id).await
    }

    pub async fn children(&self, id: &str) -> Result<Vec<Node>, NodeServiceError> {
        self.tree().children(id).await
    }

    pub async fn count(&self, filter: &NodeFilter) -> Result<usize, NodeServiceError> {
        self.tree().count(filter).await
    }

    /// Lock key guarding a node's writes against normalization
    ///
    /// Pages use their Document (or themselves when loose); every other node
    /// uses its own id, which for a Document is the normalization lock.
    fn owner_lock_key(node: &Node) -> String {
        node.as_page()
            .and_then(|page| page.document_id.clone())
            .unwrap_or_else(|| node.id.clone())
    }

    /// Lock the owner of `page_id` and read the page under that lock
    async fn lock_page(
        &self,
        page_id: &str,
    ) -> Result<(OwnedMutexGuard<()>, Node), NodeServiceError> {
        loop {
            let key = Self::owner_lock_key(&self.tree().get(page_id).await?);
            let guard = self.pipeline.lock_document(&key).await;
            let page = self.tree().get(page_id).await?;
            if Self::owner_lock_key(&page) == key {
                return Ok((guard, page));
            }
        }
    }

    /// Take several document locks in a fixed (sorted) order
    async fn lock_documents(
        &self,
        keys: impl IntoIterator<Item = String>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let keys: BTreeSet<String> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.pipeline.lock_document(key).await);
        }
        guards
    }

    /// Adjust a Document's declared page count; callers hold its lock
    async fn shift_declared_count(
        &self,
        document_id: &str,
        delta: i32,
    ) -> Result<(), NodeServiceError> {
        let mut document = self.tree().get_document(document_id).await?;
        if let Some(attrs) = document.as_document_mut() {
            attrs.declared_page_count = attrs.declared_page_count.saturating_add_signed(delta);
        }
        let document = self.tree().save(document).await?;
        self.index().index(&document).await?;
        Ok(())
    }

    // ===== Search =====

    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>, NodeServiceError> {
        self.index().search(term).await
    }

    pub async fn search_in(
        &self,
        term: &str,
        node_type: Option<NodeType>,
    ) -> Result<Vec<SearchHit>, NodeServiceError> {
        self.index().search_in(term, node_type).await
    }

    // ===== Key/Value =====

    pub async fn define_component(
        &self,
        node_id: &str,
        name: &str,
        fields: Vec<ComponentField>,
    ) -> Result<ComponentDefinition, NodeServiceError> {
        self.kv.define_component(node_id, name, fields).await
    }

    pub async fn add_kv(
        &self,
        node_id: &str,
        key: &str,
        value: Value,
    ) -> Result<KvEntry, NodeServiceError> {
        self.kv.add(node_id, key, value).await
    }

    /// Declare an own key without a value
    pub async fn add_key(&self, node_id: &str, key: &str) -> Result<KvEntry, NodeServiceError> {
        self.kv.add_key(node_id, key).await
    }

    pub async fn resolve_kv(&self, node_id: &str) -> Result<ResolvedKv, NodeServiceError> {
        self.kv.resolve(node_id).await
    }

    pub async fn count_own_kv(&self, node_id: &str) -> Result<usize, NodeServiceError> {
        self.kv.count(node_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::PendingJobs;

    fn setup() -> (DocumentService, PendingJobs) {
        let jobs = PendingJobs::new();
        let service = DocumentService::from_store(
            Arc::new(MemoryStore::new()),
            SearchConfig::default(),
            Arc::new(jobs.clone()),
        );
        (service, jobs)
    }

    async fn run_jobs(service: &DocumentService, jobs: &PendingJobs) {
        for job in jobs.drain() {
            service.pipeline().normalize(&job.document_id).await.unwrap();
        }
    }

    fn pages_of(document_id: &str) -> NodeFilter {
        NodeFilter::new()
            .with_parent_id(document_id)
            .with_node_type(NodeType::Page)
    }

    #[tokio::test]
    async fn test_create_document_submits_job_without_creating_pages() {
        let (service, jobs) = setup();
        let doc = service
            .create_document(NewDocument::new("kyuss.pdf", "ENG", "kyuss.pdf", 1222, 3).with_owner("josh"))
            .await
            .unwrap();

        assert_eq!(doc.as_document().unwrap().owner.as_deref(), Some("josh"));
        assert_eq!(service.count(&pages_of(&doc.id)).await.unwrap(), 0);
        assert_eq!(jobs.len(), 1);

        run_jobs(&service, &jobs).await;
        assert_eq!(service.count(&pages_of(&doc.id)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_document_submits_only_on_trigger_fields() {
        let (service, jobs) = setup();
        let doc = service
            .create_document(NewDocument::new("a.pdf", "ENG", "a.pdf", 1, 1))
            .await
            .unwrap();
        jobs.drain();

        service
            .update_document(&doc.id, DocumentUpdate::new().with_notes("scanned"))
            .await
            .unwrap();
        assert!(jobs.is_empty());

        // Same value as before is not a change
        service
            .update_document(&doc.id, DocumentUpdate::new().with_lang("ENG"))
            .await
            .unwrap();
        assert!(jobs.is_empty());

        let updated = service
            .update_document(&doc.id, DocumentUpdate::new().with_declared_page_count(2))
            .await
            .unwrap();
        assert_eq!(updated.as_document().unwrap().declared_page_count, 2);
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_create_page_appends_and_survives_normalization() {
        let (service, jobs) = setup();
        let doc = service
            .create_document(NewDocument::new("b.pdf", "ENG", "b.pdf", 1, 2))
            .await
            .unwrap();
        run_jobs(&service, &jobs).await;

        let page = service.create_page(&doc.id, "appendix").await.unwrap();
        let attrs = page.as_page().unwrap();
        assert_eq!(attrs.page_number, 3);
        assert_eq!(attrs.lang, "ENG");
        assert_eq!(attrs.norm_doc_title, "b.pdf");

        let report = service.pipeline().normalize(&doc.id).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(service.count(&pages_of(&doc.id)).await.unwrap(), 3);
        assert_eq!(service.search("appendix").await.unwrap()[0].node_id, page.id);
    }

    #[tokio::test]
    async fn test_set_page_text_reindexes() {
        let (service, jobs) = setup();
        let doc = service
            .create_document(NewDocument::new("c.pdf", "ENG", "c.pdf", 1, 1))
            .await
            .unwrap();
        run_jobs(&service, &jobs).await;
        let page = service.children(&doc.id).await.unwrap().remove(0);

        service
            .set_page_text(&page.id, "Some cool content in page model")
            .await
            .unwrap();
        let hits = service.search("cool").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, page.id);

        let err = service.set_page_text(&doc.id, "nope").await.unwrap_err();
        assert!(matches!(err, NodeServiceError::WrongNodeType { .. }));
    }

    #[tokio::test]
    async fn test_move_page_between_documents_resubmits_both() {
        let (service, jobs) = setup();
        let first = service
            .create_document(NewDocument::new("one.pdf", "ENG", "one.pdf", 1, 1))
            .await
            .unwrap();
        let second = service
            .create_document(NewDocument::new("two.pdf", "DEU", "two.pdf", 1, 0))
            .await
            .unwrap();
        run_jobs(&service, &jobs).await;

        let page = service.children(&first.id).await.unwrap().remove(0);
        let moved = service.move_node(&page.id, Some(&second.id)).await.unwrap();
        assert_eq!(moved.as_page().unwrap().document_id.as_deref(), Some(second.id.as_str()));

        let resubmitted: Vec<_> = jobs.drain().into_iter().map(|j| j.document_id).collect();
        assert_eq!(resubmitted, vec![first.id.clone(), second.id.clone()]);

        let declared = |node: Node| node.as_document().unwrap().declared_page_count;
        assert_eq!(declared(service.get(&first.id).await.unwrap()), 0);
        assert_eq!(declared(service.get(&second.id).await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_moved_page_survives_both_normalizations() {
        let (service, jobs) = setup();
        let first = service
            .create_document(NewDocument::new("one.pdf", "ENG", "one.pdf", 1, 1))
            .await
            .unwrap();
        let second = service
            .create_document(NewDocument::new("two.pdf", "DEU", "two.pdf", 1, 1))
            .await
            .unwrap();
        run_jobs(&service, &jobs).await;

        let page = service.children(&first.id).await.unwrap().remove(0);
        service.set_page_text(&page.id, "travelling page").await.unwrap();
        let moved = service.move_node(&page.id, Some(&second.id)).await.unwrap();
        assert_eq!(moved.as_page().unwrap().page_number, 2);
        run_jobs(&service, &jobs).await;

        assert!(service.children(&first.id).await.unwrap().is_empty());
        let mut numbers: Vec<u32> = service
            .children(&second.id)
            .await
            .unwrap()
            .iter()
            .map(|p| p.as_page().unwrap().page_number)
            .collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2]);

        let moved = service.get(&page.id).await.unwrap();
        let attrs = moved.as_page().unwrap();
        assert_eq!(attrs.text, "travelling page");
        assert_eq!(attrs.lang, "DEU");
        assert_eq!(attrs.norm_doc_title, "two.pdf");
    }

    #[tokio::test]
    async fn test_folder_search_and_kv_facade() {
        let (service, _jobs) = setup();
        let folder = service
            .create_folder(None, "Receipts", "andromeda shop receipts")
            .await
            .unwrap();

        assert_eq!(service.search("andromeda").await.unwrap().len(), 1);
        assert_eq!(service.count_own_kv(&folder.id).await.unwrap(), 0);
        service.add_key(&folder.id, "shop").await.unwrap();
        service
            .add_kv(&folder.id, "year", serde_json::json!(2024))
            .await
            .unwrap();
        assert_eq!(service.count_own_kv(&folder.id).await.unwrap(), 2);

        let resolved = service.resolve_kv(&folder.id).await.unwrap();
        assert_eq!(resolved.keys().collect::<Vec<_>>(), vec!["shop", "year"]);
    }
}
