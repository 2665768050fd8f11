//! Data Models
//!
//! This module contains the data structures used throughout DocuTree:
//!
//! - `Node` - Common node record with a type-tagged payload (Folder, Document, Page)
//! - KV types - own entries, component schemas and resolved mappings
//! - Search types - per-type field declarations and derived search documents

mod kv;
mod node;
mod search;

pub use kv::{
    ComponentDefinition, ComponentField, ComponentRef, KvEntry, KvSource, KvType, ResolvedEntry,
    ResolvedKv, KV_DATE_FORMAT,
};
pub use node::{
    DeleteResult, DocumentAttrs, DocumentUpdate, FolderAttrs, NewNode, Node, NodeFilter, NodeKind,
    NodeType, PageAttrs, ValidationError,
};
pub use search::{
    FieldDeclaration, IndexedField, MatchMode, SearchConfig, SearchDocument, SearchHit,
};
