//! Business Services
//!
//! This module contains the core services, leaves first:
//!
//! - `NodeTree` - Structural rules, navigation, move and cascading delete
//! - `KvStore` - Own keys and component keys inherited down the tree
//! - `SearchIndex` - Derived per-node search documents and ranked search
//! - `NormalizationPipeline` - Page reconciliation and derived-field propagation
//! - `NormalizationProcessor` - Background worker executing normalization jobs
//! - `DocumentService` - Ingress facade that submits normalization jobs explicitly
//!
//! Services coordinate between the storage layer and callers, implementing the
//! structural and consistency rules of the tree.

pub mod document_service;
pub mod error;
pub mod keyed_lock;
pub mod kv_store;
pub mod node_tree;
pub mod normalization;
pub mod normalization_processor;
pub mod search_index;

pub use document_service::{DocumentService, NewDocument};
pub use error::NodeServiceError;
pub use keyed_lock::KeyedLocks;
pub use kv_store::KvStore;
pub use node_tree::NodeTree;
pub use normalization::{NormalizationPipeline, NormalizationReport};
pub use normalization_processor::{
    JobSubmitter, NormalizationEvent, NormalizationProcessor, NormalizationQueue, NormalizeJob,
    PendingJobs,
};
pub use search_index::SearchIndex;
