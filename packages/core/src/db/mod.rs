//! Storage Layer
//!
//! Persisted state is accessed only through the [`NodeStore`] trait so that the
//! services never depend on a concrete backend. The logical layout is:
//!
//! - node rows keyed by id, with a parent foreign key
//! - own KV entries keyed by `(node_id, key)`
//! - component definitions keyed by `(node_id, name)`
//! - search documents keyed by `node_id`
//!
//! [`MemoryStore`] keeps these tables in memory and can persist them as a JSON
//! snapshot.

mod error;
mod memory_store;
mod node_store;

pub use error::StoreError;
pub use memory_store::MemoryStore;
pub use node_store::NodeStore;
