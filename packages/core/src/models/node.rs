//! Node Data Structures
//!
//! This module defines the `Node` struct and the type-tagged payloads that make up
//! DocuTree's single hierarchical namespace.
//!
//! # Architecture
//!
//! - **Common Record + Tagged Payload**: every node shares `id`, `parent_id`, `title`
//!   and timestamps; type-specific attributes live in [`NodeKind`]
//! - **Fixed Type**: a node's [`NodeType`] is decided at creation and never changes
//! - **Derived Page Fields**: `PageAttrs::lang` and `PageAttrs::norm_doc_title` are
//!   written only by normalization
//!
//! # Examples
//!
//! ```rust
//! use docutree_core::models::{DocumentAttrs, NewNode, NodeType};
//!
//! let folder = NewNode::folder("Invoices");
//! assert_eq!(folder.node_type(), NodeType::Folder);
//!
//! let document = NewNode::document(
//!     "kyuss.pdf",
//!     DocumentAttrs::new("ENG", "kyuss.pdf", 1222, 3),
//! );
//! assert_eq!(document.node_type(), NodeType::Document);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for Node operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("Invalid node ID format: {0}")]
    InvalidId(String),

    #[error("Invalid page number: {0}")]
    InvalidPageNumber(u32),

    #[error("Page number {0} already used in this document")]
    DuplicatePageNumber(u32),

    #[error("Duplicate key in component schema: {0}")]
    DuplicateKey(String),
}

/// The three kinds of node in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Folder,
    Document,
    Page,
}

impl NodeType {
    /// Whether a node of this type may own a child of type `child`
    ///
    /// Folders accept anything, Documents accept only Pages, Pages are leaves.
    pub fn accepts_child(self, child: NodeType) -> bool {
        match self {
            NodeType::Folder => true,
            NodeType::Document => child == NodeType::Page,
            NodeType::Page => false,
        }
    }

    /// Whether a node of this type may sit at the top of the forest
    pub fn can_be_root(self) -> bool {
        !matches!(self, NodeType::Page)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Folder => "folder",
            NodeType::Document => "document",
            NodeType::Page => "page",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(NodeType::Folder),
            "document" => Ok(NodeType::Document),
            "page" => Ok(NodeType::Page),
            other => Err(ValidationError::InvalidNodeType(other.to_string())),
        }
    }
}

/// Folder-specific attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderAttrs {
    /// Free-form notes, indexed for search
    #[serde(default)]
    pub notes: String,
}

/// Document-specific attributes (authored by the caller)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAttrs {
    /// Language code (e.g. "ENG"), inherited by every page
    pub lang: String,

    /// Original file name of the uploaded document
    pub file_name: String,

    /// Size of the original file in bytes
    pub size_bytes: u64,

    /// Number of pages the document is declared to have
    pub declared_page_count: u32,

    /// Owner reference (opaque to the core)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default)]
    pub notes: String,

    /// Aggregate extracted text, populated externally
    #[serde(default)]
    pub text: String,
}

impl DocumentAttrs {
    pub fn new(
        lang: impl Into<String>,
        file_name: impl Into<String>,
        size_bytes: u64,
        declared_page_count: u32,
    ) -> Self {
        Self {
            lang: lang.into(),
            file_name: file_name.into(),
            size_bytes,
            declared_page_count,
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Page-specific attributes
///
/// `lang` and `norm_doc_title` are derived from the parent Document and are
/// overwritten on every normalization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAttrs {
    /// Back-reference to the owning Document (`None` for a loose page in a folder)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    /// 1-based position within the document
    pub page_number: u32,

    /// Extracted/OCR text
    #[serde(default)]
    pub text: String,

    /// Derived: copied from the parent Document
    #[serde(default)]
    pub lang: String,

    /// Derived: the parent Document's title
    #[serde(default)]
    pub norm_doc_title: String,
}

impl PageAttrs {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Type-tagged payload carried by every node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "nodeType", rename_all = "lowercase")]
pub enum NodeKind {
    Folder(FolderAttrs),
    Document(DocumentAttrs),
    Page(PageAttrs),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Folder(_) => NodeType::Folder,
            NodeKind::Document(_) => NodeType::Document,
            NodeKind::Page(_) => NodeType::Page,
        }
    }
}

/// A single element of the tree.
///
/// # Fields
///
/// - `id`: Opaque stable identifier (UUID v4)
/// - `parent_id`: Owning parent; `None` for roots
/// - `title`: Display title
/// - `creation_seq`: Store-assigned monotonically increasing creation order
/// - `created_at` / `modified_at`: Timestamps
/// - `kind`: Type-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,

    pub parent_id: Option<String>,

    pub title: String,

    /// Creation order, used to break timestamp ties
    #[serde(default)]
    pub creation_seq: u64,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    /// Build a node with a fresh UUID; `creation_seq` is assigned by the store on insert
    pub fn new(parent_id: Option<String>, title: impl Into<String>, kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id,
            title: title.into(),
            creation_seq: 0,
            created_at: now,
            modified_at: now,
            kind,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn as_folder(&self) -> Option<&FolderAttrs> {
        match &self.kind {
            NodeKind::Folder(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentAttrs> {
        match &self.kind {
            NodeKind::Document(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut DocumentAttrs> {
        match &mut self.kind {
            NodeKind::Document(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&PageAttrs> {
        match &self.kind {
            NodeKind::Page(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn as_page_mut(&mut self) -> Option<&mut PageAttrs> {
        match &mut self.kind {
            NodeKind::Page(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Text of a named field, as seen by the search index
    ///
    /// Returns `None` when this node type has no such field.
    pub fn field_text(&self, field: &str) -> Option<&str> {
        if field == "title" {
            return Some(&self.title);
        }
        match (&self.kind, field) {
            (NodeKind::Folder(f), "notes") => Some(&f.notes),
            (NodeKind::Document(d), "notes") => Some(&d.notes),
            (NodeKind::Document(d), "text") => Some(&d.text),
            (NodeKind::Document(d), "lang") => Some(&d.lang),
            (NodeKind::Document(d), "file_name") => Some(&d.file_name),
            (NodeKind::Page(p), "text") => Some(&p.text),
            (NodeKind::Page(p), "lang") => Some(&p.lang),
            (NodeKind::Page(p), "norm_doc_title") => Some(&p.norm_doc_title),
            _ => None,
        }
    }

    /// Bump `modified_at`
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Validate node structure
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the id is empty, the node references
    /// itself as parent, or a page carries page number 0.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id".to_string()));
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(ValidationError::InvalidId(format!(
                "node {} cannot be its own parent",
                self.id
            )));
        }
        if let NodeKind::Page(page) = &self.kind {
            if page.page_number == 0 {
                return Err(ValidationError::InvalidPageNumber(0));
            }
        }
        Ok(())
    }
}

/// Creation request for a node: title plus type payload
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub title: String,
    pub kind: NodeKind,
}

impl NewNode {
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: NodeKind::Folder(FolderAttrs::default()),
        }
    }

    pub fn document(title: impl Into<String>, attrs: DocumentAttrs) -> Self {
        Self {
            title: title.into(),
            kind: NodeKind::Document(attrs),
        }
    }

    /// A page titled after its number ("Page 3")
    pub fn page(attrs: PageAttrs) -> Self {
        Self {
            title: format!("Page {}", attrs.page_number),
            kind: NodeKind::Page(attrs),
        }
    }

    /// Attach notes (folders and documents only; ignored otherwise)
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        match &mut self.kind {
            NodeKind::Folder(f) => f.notes = notes.into(),
            NodeKind::Document(d) => d.notes = notes.into(),
            NodeKind::Page(_) => {}
        }
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// Sparse update of a Document's authored attributes
///
/// Only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_page_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl DocumentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_declared_page_count(mut self, count: u32) -> Self {
        self.declared_page_count = Some(count);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.lang.is_none()
            && self.declared_page_count.is_none()
            && self.notes.is_none()
            && self.text.is_none()
    }
}

/// Result of a delete operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// IDs removed, target node included (descendants first)
    pub deleted_ids: Vec<String>,
}

impl DeleteResult {
    pub fn deleted_count(&self) -> usize {
        self.deleted_ids.len()
    }
}

/// Structural filter used by `NodeTree::count` and `NodeStore::find_nodes`
///
/// # Examples
///
/// ```rust
/// use docutree_core::models::{NodeFilter, NodeType};
///
/// // "children of document X of type Page"
/// let filter = NodeFilter::new()
///     .with_parent_id("document-x")
///     .with_node_type(NodeType::Page);
/// assert_eq!(filter.node_type, Some(NodeType::Page));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilter {
    /// Filter by node type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,

    /// Filter by parent ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Filter for root nodes only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_root: Option<bool>,

    /// Filter pages by owning document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_is_root(mut self, is_root: bool) -> Self {
        self.is_root = Some(is_root);
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Whether `node` passes every set criterion
    pub fn matches(&self, node: &Node) -> bool {
        if let Some(node_type) = self.node_type {
            if node.node_type() != node_type {
                return false;
            }
        }
        if let Some(parent_id) = &self.parent_id {
            if node.parent_id.as_ref() != Some(parent_id) {
                return false;
            }
        }
        if let Some(is_root) = self.is_root {
            if node.is_root() != is_root {
                return false;
            }
        }
        if let Some(document_id) = &self.document_id {
            match node.as_page() {
                Some(page) if page.document_id.as_ref() == Some(document_id) => {}
                _ => return false,
            }
        }
        true
    }
}
