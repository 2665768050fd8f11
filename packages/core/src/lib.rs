//! DocuTree Core Business Logic Layer
//!
//! This crate provides the node tree, typed key/value metadata, search indexing
//! and page normalization for the DocuTree document organizer.
//!
//! # Architecture
//!
//! - **Tagged Node Payloads**: Folder, Document and Page share one node record;
//!   type-specific fields live in a tagged payload
//! - **Storage Seam**: services talk to an async [`db::NodeStore`] trait;
//!   [`db::MemoryStore`] is the bundled backend with JSON snapshots
//! - **Explicit Triggers**: Document changes submit normalization jobs at the
//!   call site; a background processor executes them
//! - **Derived Index**: search documents are projections, rebuilt from node state
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, KV entries, search documents)
//! - [`services`] - NodeTree, KvStore, SearchIndex, normalization, DocumentService
//! - [`db`] - Storage trait and in-memory implementation
//! - [`config`] - Core configuration with environment overrides

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{CoreConfig, NormalizationConfig};
pub use models::*;
pub use services::*;
