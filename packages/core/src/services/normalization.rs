//! Normalization Pipeline
//!
//! Reconciles a Document's Page children with its authored state. A run has three
//! strictly sequential steps:
//!
//! 1. **Reconcile page count**: create Pages numbered after the current maximum
//!    until `declared_page_count` is reached, or delete the highest-numbered
//!    excess Pages
//! 2. **Propagate attributes**: copy `lang` and `title` from the Document onto
//!    every Page (`PageAttrs::lang` / `PageAttrs::norm_doc_title`)
//! 3. **Reindex**: republish every Page and the Document itself into the
//!    [`SearchIndex`]
//!
//! Runs for the same document are serialized by a per-document lock. A failed
//! run leaves the tree valid and is converged by simply running again; there is
//! no rollback. Normalization never mutates Folder or Document nodes.
//!
//! Step 3 offers every surviving Page to the index, not only the ones changed in
//! this run. `SearchIndex::index` is a no-op for an unchanged projection, so a run
//! after a failed reindex still converges.

use crate::db::NodeStore;
use crate::models::{NewNode, Node, NodeType, PageAttrs, SearchConfig};
use crate::services::{KeyedLocks, NodeServiceError, NodeTree, SearchIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Default base delay between retry attempts
const DEFAULT_RETRY_BACKOFF_MS: u64 = 10;

/// Upper bound on a single retry delay
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of one normalization run
///
/// A report whose lists are empty and whose `reindexed` is 0 describes a no-op
/// run: the document was already normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationReport {
    pub document_id: String,

    /// Pages created to reach the declared count
    pub created: Vec<String>,

    /// Excess pages deleted (highest page numbers first)
    pub deleted: Vec<String>,

    /// Pages whose derived attributes were rewritten
    pub updated: Vec<String>,

    /// Search documents that actually changed
    pub reindexed: usize,
}

impl NormalizationReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.deleted.is_empty()
            && self.updated.is_empty()
            && self.reindexed == 0
    }
}

/// Page reconciliation and derived-field propagation for Documents
#[derive(Clone)]
pub struct NormalizationPipeline {
    tree: NodeTree,
    index: SearchIndex,
    locks: Arc<KeyedLocks>,
    retry_backoff: Duration,
}

impl NormalizationPipeline {
    pub fn new(tree: NodeTree, index: SearchIndex) -> Self {
        Self {
            tree,
            index,
            locks: Arc::new(KeyedLocks::new()),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }

    /// Tree and index sharing one store
    pub fn from_store(store: Arc<dyn NodeStore>, search: SearchConfig) -> Self {
        Self::new(NodeTree::new(store.clone()), SearchIndex::new(store, search))
    }

    /// Base delay for `normalize_with_retry`; attempt `n` waits `base * 2^n`
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Hold the per-document lock that serializes normalization runs
    ///
    /// Callers that add pages outside the pipeline take it so they never race a
    /// reconciliation of the same document.
    pub async fn lock_document(&self, document_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(document_id).await
    }

    /// Run one full normalization of `document_id`
    ///
    /// # Errors
    ///
    /// - `NotFound` / `WrongNodeType` if `document_id` is not a Document
    /// - `NormalizationFailure` if any step fails partway; re-running is safe
    pub async fn normalize(&self, document_id: &str) -> Result<NormalizationReport, NodeServiceError> {
        let _guard = self.lock_document(document_id).await;

        let document = self.tree.get_document(document_id).await?;
        let mut report = NormalizationReport::new(document_id);

        self.reconcile_page_count(&document, &mut report).await?;
        let pages = self.propagate_attributes(&document, &mut report).await?;
        self.reindex(&document, &pages, &mut report).await?;

        if report.is_noop() {
            tracing::debug!("Document {} already normalized", document_id);
        } else {
            tracing::info!(
                "Normalized document {}: {} created, {} deleted, {} updated, {} reindexed",
                document_id,
                report.created.len(),
                report.deleted.len(),
                report.updated.len(),
                report.reindexed
            );
        }
        Ok(report)
    }

    /// Run `normalize`, retrying retryable failures with exponential backoff
    ///
    /// # Arguments
    ///
    /// * `document_id` - Document to normalize
    /// * `max_retries` - Maximum number of retry attempts (0 = single attempt)
    ///
    /// # Errors
    ///
    /// The last error once retries are exhausted, or the first non-retryable one.
    pub async fn normalize_with_retry(
        &self,
        document_id: &str,
        max_retries: usize,
    ) -> Result<NormalizationReport, NodeServiceError> {
        let mut attempt = 0;

        loop {
            match self.normalize(document_id).await {
                Ok(report) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "Normalization of {} succeeded after {} retry(ies)",
                            document_id,
                            attempt
                        );
                    }
                    return Ok(report);
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    tracing::warn!(
                        "Normalization attempt {}/{} for {} failed: {}. Retrying...",
                        attempt + 1,
                        max_retries + 1,
                        document_id,
                        e
                    );

                    tokio::time::sleep(self.backoff_for(attempt)).await;

                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!(
                            "Max retries ({}) exceeded normalizing {}: {}",
                            max_retries,
                            document_id,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Delay before retry number `attempt + 1`: `retry_backoff * 2^attempt`, capped
    fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.retry_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_BACKOFF)
            .min(MAX_RETRY_BACKOFF)
    }

    /// Step 1: make the number of Page children equal `declared_page_count`
    async fn reconcile_page_count(
        &self,
        document: &Node,
        report: &mut NormalizationReport,
    ) -> Result<(), NodeServiceError> {
        let declared = document
            .as_document()
            .map(|attrs| attrs.declared_page_count as usize)
            .unwrap_or_default();

        let mut pages = self.pages_of(document).await?;
        let current = pages.len();

        if current < declared {
            let mut next_number = pages
                .last()
                .and_then(Node::as_page)
                .map(|page| page.page_number)
                .unwrap_or(0);

            for _ in current..declared {
                next_number += 1;
                let created = self
                    .tree
                    .create(Some(&document.id), NewNode::page(PageAttrs::new(next_number, "")))
                    .await
                    .map_err(|e| {
                        Self::step_failure(
                            &document.id,
                            format!(
                                "created {} of {} missing pages: {}",
                                report.created.len(),
                                declared - current,
                                e
                            ),
                        )
                    })?;
                report.created.push(created.id);
            }
        } else if current > declared {
            // Highest page numbers go first
            pages.reverse();
            for page in pages.into_iter().take(current - declared) {
                match self.tree.delete(&page.id).await {
                    Ok(_) => report.deleted.push(page.id),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        return Err(Self::step_failure(
                            &document.id,
                            format!("deleting excess page {}: {}", page.id, e),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 2: copy derived attributes onto every Page; returns the final page set
    async fn propagate_attributes(
        &self,
        document: &Node,
        report: &mut NormalizationReport,
    ) -> Result<Vec<Node>, NodeServiceError> {
        let lang = document
            .as_document()
            .map(|attrs| attrs.lang.clone())
            .unwrap_or_default();

        let mut pages = self.pages_of(document).await?;
        for page in pages.iter_mut() {
            let Some(attrs) = page.as_page_mut() else {
                continue;
            };
            if attrs.lang == lang && attrs.norm_doc_title == document.title {
                continue;
            }
            attrs.lang = lang.clone();
            attrs.norm_doc_title = document.title.clone();

            *page = self.tree.save(page.clone()).await.map_err(|e| {
                Self::step_failure(&document.id, format!("updating page {}: {}", page.id, e))
            })?;
            report.updated.push(page.id.clone());
        }
        Ok(pages)
    }

    /// Step 3: republish the Document and its Pages
    async fn reindex(
        &self,
        document: &Node,
        pages: &[Node],
        report: &mut NormalizationReport,
    ) -> Result<(), NodeServiceError> {
        let mut seen = HashSet::new();
        for node in std::iter::once(document).chain(pages.iter()) {
            if !seen.insert(node.id.as_str()) {
                continue;
            }
            let changed = self.index.index(node).await.map_err(|e| {
                Self::step_failure(&document.id, format!("indexing {}: {}", node.id, e))
            })?;
            if changed {
                report.reindexed += 1;
            }
        }
        Ok(())
    }

    /// Page children sorted by page number
    async fn pages_of(&self, document: &Node) -> Result<Vec<Node>, NodeServiceError> {
        let mut pages = self
            .tree
            .children_of_type(&document.id, NodeType::Page)
            .await?;
        pages.sort_by_key(|page| {
            (
                page.as_page().map(|attrs| attrs.page_number).unwrap_or(0),
                page.creation_seq,
            )
        });
        Ok(pages)
    }

    fn step_failure(document_id: &str, reason: String) -> NodeServiceError {
        tracing::warn!("Normalization of {} failed: {}", document_id, reason);
        NodeServiceError::normalization_failure(document_id, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{DocumentAttrs, NodeFilter};

    fn setup() -> NormalizationPipeline {
        NormalizationPipeline::from_store(Arc::new(MemoryStore::new()), SearchConfig::default())
    }

    async fn create_document(
        pipeline: &NormalizationPipeline,
        title: &str,
        lang: &str,
        pages: u32,
    ) -> Node {
        pipeline
            .tree()
            .create(None, NewNode::document(title, DocumentAttrs::new(lang, title, 1222, pages)))
            .await
            .unwrap()
    }

    async fn page_count(pipeline: &NormalizationPipeline, document_id: &str) -> usize {
        pipeline
            .tree()
            .count(
                &NodeFilter::new()
                    .with_parent_id(document_id)
                    .with_node_type(NodeType::Page),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_pages_and_propagates_attributes() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "kyuss.pdf", "ENG", 3).await;

        let report = pipeline.normalize(&doc.id).await.unwrap();
        assert_eq!(report.created.len(), 3);
        assert_eq!(report.updated.len(), 3);
        // Document plus three pages
        assert_eq!(report.reindexed, 4);

        let pages = pipeline.pages_of(&doc).await.unwrap();
        let numbers: Vec<u32> = pages
            .iter()
            .map(|p| p.as_page().unwrap().page_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        for page in &pages {
            let attrs = page.as_page().unwrap();
            assert_eq!(attrs.lang, "ENG");
            assert_eq!(attrs.norm_doc_title, "kyuss.pdf");
            assert_eq!(attrs.document_id.as_deref(), Some(doc.id.as_str()));
        }

        let hits = pipeline.index().search("kyuss").await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.node_type == NodeType::Page));
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "a.pdf", "ENG", 2).await;

        pipeline.normalize(&doc.id).await.unwrap();
        let before = pipeline.index().search("a.pdf").await.unwrap();

        let second = pipeline.normalize(&doc.id).await.unwrap();
        assert!(second.is_noop(), "unexpected changes: {:?}", second);
        assert_eq!(pipeline.index().search("a.pdf").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_deletes_highest_numbered_excess_pages() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "b.pdf", "ENG", 4).await;
        pipeline.normalize(&doc.id).await.unwrap();

        let mut shrunk = pipeline.tree().get(&doc.id).await.unwrap();
        shrunk.as_document_mut().unwrap().declared_page_count = 2;
        let shrunk = pipeline.tree().save(shrunk).await.unwrap();

        let report = pipeline.normalize(&shrunk.id).await.unwrap();
        assert_eq!(report.deleted.len(), 2);
        let numbers: Vec<u32> = pipeline
            .pages_of(&shrunk)
            .await
            .unwrap()
            .iter()
            .map(|p| p.as_page().unwrap().page_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);

        for id in &report.deleted {
            assert!(pipeline.index().document(id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_recreates_pages_after_manual_delete() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "c.pdf", "ENG", 3).await;
        pipeline.normalize(&doc.id).await.unwrap();

        for page in pipeline.pages_of(&doc).await.unwrap() {
            pipeline.tree().delete(&page.id).await.unwrap();
        }
        assert_eq!(page_count(&pipeline, &doc.id).await, 0);

        let report = pipeline.normalize(&doc.id).await.unwrap();
        assert_eq!(report.created.len(), 3);
        assert_eq!(page_count(&pipeline, &doc.id).await, 3);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let pipeline = setup().with_retry_backoff(Duration::from_millis(10));
        assert_eq!(pipeline.backoff_for(0), Duration::from_millis(10));
        assert_eq!(pipeline.backoff_for(3), Duration::from_millis(80));

        let huge = setup().with_retry_backoff(Duration::from_millis(u64::MAX));
        assert_eq!(huge.backoff_for(0), MAX_RETRY_BACKOFF);
        assert_eq!(huge.backoff_for(40), MAX_RETRY_BACKOFF);
    }

    #[tokio::test]
    async fn test_new_pages_numbered_after_current_max() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "d.pdf", "ENG", 3).await;
        pipeline
            .tree()
            .create(Some(&doc.id), NewNode::page(PageAttrs::new(7, "stray")))
            .await
            .unwrap();

        pipeline.normalize(&doc.id).await.unwrap();
        let numbers: Vec<u32> = pipeline
            .pages_of(&doc)
            .await
            .unwrap()
            .iter()
            .map(|p| p.as_page().unwrap().page_number)
            .collect();
        assert_eq!(numbers, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_stale_derived_values_are_overwritten() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "first.pdf", "ENG", 1).await;
        pipeline.normalize(&doc.id).await.unwrap();

        let mut renamed = pipeline.tree().get(&doc.id).await.unwrap();
        renamed.title = "second.pdf".to_string();
        renamed.as_document_mut().unwrap().lang = "DEU".to_string();
        let renamed = pipeline.tree().save(renamed).await.unwrap();

        let report = pipeline.normalize(&renamed.id).await.unwrap();
        assert_eq!(report.updated.len(), 1);

        let page = &pipeline.pages_of(&renamed).await.unwrap()[0];
        assert_eq!(page.as_page().unwrap().lang, "DEU");
        assert_eq!(page.as_page().unwrap().norm_doc_title, "second.pdf");
        assert_eq!(pipeline.index().search("second.pdf").await.unwrap().len(), 2);
        assert!(pipeline.index().search("first.pdf").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_documents() {
        let pipeline = setup();
        let folder = pipeline
            .tree()
            .create(None, NewNode::folder("f"))
            .await
            .unwrap();

        let err = pipeline.normalize(&folder.id).await.unwrap_err();
        assert!(matches!(err, NodeServiceError::WrongNodeType { .. }));
        assert!(pipeline.normalize("missing").await.unwrap_err().is_not_found());
        assert!(pipeline
            .normalize_with_retry("missing", 3)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_double_create() {
        let pipeline = setup();
        let doc = create_document(&pipeline, "f.pdf", "ENG", 5).await;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = pipeline.clone();
                let id = doc.id.clone();
                tokio::spawn(async move { pipeline.normalize(&id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(page_count(&pipeline, &doc.id).await, 5);
    }
}
