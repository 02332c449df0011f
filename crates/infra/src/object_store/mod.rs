//! Object store boundary.
//!
//! The bridge does not own the object store; this module defines the narrow
//! interface it consumes (paginated version listing, versioned fetch) without
//! making storage assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryObjectStore;
pub use r#trait::{FetchedObject, ObjectStore, ObjectStoreError, ObjectVersion, VersionPage};
