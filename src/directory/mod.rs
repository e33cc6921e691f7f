//! External collaborators of the orchestration core
//!
//! Room directory, persistence store and track catalog, each behind a trait
//! with an in-process implementation.

pub mod catalog;
pub mod persistence;
pub mod provider;

pub use catalog::{CatalogMatcher, InMemoryCatalog};
pub use persistence::{InMemorySnapshotStore, MemorySnapshot, SnapshotStore};
pub use provider::{InMemoryRoomDirectory, RoomDirectory};

#[cfg(test)]
pub use persistence::MockSnapshotStore;
#[cfg(test)]
pub use provider::MockRoomDirectory;
