//! Content store: the sole owner of Documents, Versions, and Dependencies.
//!
//! Callers never coordinate IDs, optimistic locking, dependency derivation,
//! or soft-delete themselves — `ContentStore` exposes a coarse interface
//! that owns all of those invariants internally.

pub mod ids;
pub mod store;
pub mod types;
pub mod wikilinks;

pub use ids::generate_document_id;
pub use store::ContentStore;
pub use types::{Dependency, Document, DocumentUpdate, DocumentWrite, Version};
