//! Search Index Types
//!
//! A `SearchDocument` is the derived projection of a node that the search index
//! matches against. Which fields are projected, and how each one matches, is
//! decided by an immutable [`SearchConfig`] table keyed by node type.

use crate::models::{Node, NodeType};
use serde::{Deserialize, Serialize};

/// How a field matches a search term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Term must equal one whitespace-separated token (case-insensitive)
    Exact,
    /// Term may appear anywhere in the field (case-insensitive substring)
    Partial,
}

/// One indexed field of a node type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeclaration {
    pub name: String,
    pub mode: MatchMode,
    /// Relevance contributed when this field matches
    pub weight: u32,
}

impl FieldDeclaration {
    pub fn exact(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: MatchMode::Exact,
            weight: 1,
        }
    }

    pub fn partial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: MatchMode::Partial,
            weight: 1,
        }
    }

    pub fn boosted(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Per-type field declaration table
///
/// The default table:
///
/// | Type | Fields |
/// |---|---|
/// | Folder | `title` exact, `notes` partial ×2 |
/// | Document | `title` exact, `notes` partial ×2, `text` partial ×2 |
/// | Page | `title` exact, `text` partial ×2, `norm_doc_title` partial |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    pub folder: Vec<FieldDeclaration>,
    pub document: Vec<FieldDeclaration>,
    pub page: Vec<FieldDeclaration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            folder: vec![
                FieldDeclaration::exact("title"),
                FieldDeclaration::partial("notes").boosted(2),
            ],
            document: vec![
                FieldDeclaration::exact("title"),
                FieldDeclaration::partial("notes").boosted(2),
                FieldDeclaration::partial("text").boosted(2),
            ],
            page: vec![
                FieldDeclaration::exact("title"),
                FieldDeclaration::partial("text").boosted(2),
                FieldDeclaration::partial("norm_doc_title"),
            ],
        }
    }
}

impl SearchConfig {
    pub fn fields_for(&self, node_type: NodeType) -> &[FieldDeclaration] {
        match node_type {
            NodeType::Folder => &self.folder,
            NodeType::Document => &self.document,
            NodeType::Page => &self.page,
        }
    }
}

/// One projected field with its matching policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedField {
    pub name: String,
    pub text: String,
    pub mode: MatchMode,
    pub weight: u32,
}

impl IndexedField {
    /// Whether a lowercased, trimmed `term` matches this field
    pub fn matches(&self, term: &str) -> bool {
        let text = self.text.to_lowercase();
        match self.mode {
            MatchMode::Exact => text == term || text.split_whitespace().any(|token| token == term),
            MatchMode::Partial => text.contains(term),
        }
    }
}

/// Derived, indexable projection of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    pub node_id: String,
    pub node_type: NodeType,
    pub title: String,
    pub creation_seq: u64,
    pub fields: Vec<IndexedField>,
}

impl SearchDocument {
    /// Project `node` through the declarations for its type
    ///
    /// Deterministic: the same node state always yields the same document.
    pub fn project(node: &Node, config: &SearchConfig) -> Self {
        let fields = config
            .fields_for(node.node_type())
            .iter()
            .filter_map(|decl| {
                node.field_text(&decl.name).map(|text| IndexedField {
                    name: decl.name.clone(),
                    text: text.to_string(),
                    mode: decl.mode,
                    weight: decl.weight,
                })
            })
            .collect();

        Self {
            node_id: node.id.clone(),
            node_type: node.node_type(),
            title: node.title.clone(),
            creation_seq: node.creation_seq,
            fields,
        }
    }

    /// Sum of the weights of every field matching `term`; 0 means no match
    pub fn score(&self, term: &str) -> u32 {
        self.fields
            .iter()
            .filter(|f| f.matches(term))
            .map(|f| f.weight)
            .sum()
    }
}

/// A ranked search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub node_id: String,
    pub node_type: NodeType,
    pub title: String,
    pub score: u32,
}
