//! SearchIndex - Derived Text Index
//!
//! Maintains one [`SearchDocument`] per indexed node, projected from the node's
//! current fields through the immutable [`SearchConfig`] table the index owns.
//!
//! # Ranking
//!
//! A node matches when any declared field matches the term. Its score is the sum
//! of the weights of all matching fields. Results are ordered by descending
//! score, then by creation order.
//!
//! Writes are atomic per node id (one store call each); there is no cross-node
//! locking.

use crate::db::NodeStore;
use crate::models::{Node, NodeType, SearchConfig, SearchDocument, SearchHit};
use crate::services::NodeServiceError;
use std::sync::Arc;

/// Text search over derived node projections
#[derive(Clone)]
pub struct SearchIndex {
    store: Arc<dyn NodeStore>,
    config: Arc<SearchConfig>,
}

impl SearchIndex {
    pub fn new(store: Arc<dyn NodeStore>, config: SearchConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Compute and store the search document for `node`, replacing any previous one
    ///
    /// Returns `true` when the stored document changed.
    pub async fn index(&self, node: &Node) -> Result<bool, NodeServiceError> {
        let document = SearchDocument::project(node, &self.config);
        let previous = self.store.get_search_document(&node.id).await?;
        if previous.as_ref() == Some(&document) {
            return Ok(false);
        }

        self.store.put_search_document(document).await?;
        tracing::debug!("Indexed {} {}", node.node_type(), node.id);
        Ok(true)
    }

    /// Drop the search document of `node_id`; returns whether one existed
    pub async fn remove(&self, node_id: &str) -> Result<bool, NodeServiceError> {
        Ok(self.store.remove_search_document(node_id).await?)
    }

    /// Stored search document of a node, if any
    pub async fn document(&self, node_id: &str) -> Result<Option<SearchDocument>, NodeServiceError> {
        Ok(self.store.get_search_document(node_id).await?)
    }

    /// Ranked matches for `term` across every node type
    ///
    /// An empty or whitespace-only term matches nothing.
    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>, NodeServiceError> {
        self.search_in(term, None).await
    }

    /// Ranked matches for `term`, optionally restricted to one node type
    pub async fn search_in(
        &self,
        term: &str,
        node_type: Option<NodeType>,
    ) -> Result<Vec<SearchHit>, NodeServiceError> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u32, u64, SearchDocument)> = self
            .store
            .list_search_documents(node_type)
            .await?
            .into_iter()
            .filter_map(|doc| {
                let score = doc.score(&term);
                (score > 0).then_some((score, doc.creation_seq, doc))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        tracing::debug!("Search '{}' matched {} node(s)", term, scored.len());
        Ok(scored
            .into_iter()
            .map(|(score, _, doc)| SearchHit {
                node_id: doc.node_id,
                node_type: doc.node_type,
                title: doc.title,
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{DocumentAttrs, NewNode, PageAttrs};
    use crate::services::NodeTree;

    fn setup() -> (NodeTree, SearchIndex) {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
        (
            NodeTree::new(store.clone()),
            SearchIndex::new(store, SearchConfig::default()),
        )
    }

    async fn page_with_text(tree: &NodeTree, doc_id: &str, number: u32, text: &str) -> Node {
        tree.create(Some(doc_id), NewNode::page(PageAttrs::new(number, text)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_round_trip_and_removal() {
        let (tree, index) = setup();
        let doc = tree
            .create(None, NewNode::document("a.pdf", DocumentAttrs::new("ENG", "a.pdf", 1, 1)))
            .await
            .unwrap();
        let page = page_with_text(&tree, &doc.id, 1, "Some cool content in page model").await;
        index.index(&page).await.unwrap();

        let hits = index.search("cool").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, page.id);

        assert!(index.search("andromeda").await.unwrap().is_empty());

        assert!(index.remove(&page.id).await.unwrap());
        assert!(index.search("cool").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_is_idempotent() {
        let (tree, index) = setup();
        let folder = tree
            .create(None, NewNode::folder("Taxes").with_notes("yearly returns"))
            .await
            .unwrap();

        assert!(index.index(&folder).await.unwrap());
        let first = index.document(&folder.id).await.unwrap();
        assert!(!index.index(&folder).await.unwrap());
        assert_eq!(index.document(&folder.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_ranking_by_weight_then_creation() {
        let (tree, index) = setup();
        let doc = tree
            .create(None, NewNode::document("rock.pdf", DocumentAttrs::new("ENG", "rock.pdf", 1, 2)))
            .await
            .unwrap();
        // Title-only match (weight 1), created first
        let titled = tree
            .create(None, NewNode::folder("desert"))
            .await
            .unwrap();
        // Text match (weight 2), created later
        let texted = page_with_text(&tree, &doc.id, 1, "high desert sessions").await;
        // Another title-only match, created last
        let titled_late = tree
            .create(None, NewNode::folder("desert"))
            .await
            .unwrap();

        for node in [&titled, &texted, &titled_late] {
            index.index(node).await.unwrap();
        }

        let hits = index.search("Desert").await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.node_id.clone()).collect();
        assert_eq!(ids, vec![texted.id, titled.id, titled_late.id]);
        assert_eq!(hits[0].score, 2);
        assert_eq!(hits[1].score, 1);
    }

    #[tokio::test]
    async fn test_exact_title_requires_whole_token() {
        let (tree, index) = setup();
        let doc = tree
            .create(None, NewNode::document("kyuss.pdf", DocumentAttrs::new("ENG", "kyuss.pdf", 1, 0)))
            .await
            .unwrap();
        index.index(&doc).await.unwrap();

        assert!(index.search("kyuss").await.unwrap().is_empty());
        assert_eq!(index.search("kyuss.pdf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_in_restricts_type_and_blank_term_matches_nothing() {
        let (tree, index) = setup();
        let folder = tree.create(None, NewNode::folder("stoner")).await.unwrap();
        let doc = tree
            .create(None, NewNode::document("stoner", DocumentAttrs::new("ENG", "s.pdf", 1, 0)))
            .await
            .unwrap();
        index.index(&folder).await.unwrap();
        index.index(&doc).await.unwrap();

        assert_eq!(index.search("stoner").await.unwrap().len(), 2);
        let docs_only = index
            .search_in("stoner", Some(NodeType::Document))
            .await
            .unwrap();
        assert_eq!(docs_only.len(), 1);
        assert_eq!(docs_only[0].node_type, NodeType::Document);

        assert!(index.search("   ").await.unwrap().is_empty());
    }
}
