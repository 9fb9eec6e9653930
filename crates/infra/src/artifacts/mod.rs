//! Blob storage for produced artifacts.

pub mod local;
pub mod memory;

pub use local::LocalArtifactStore;
pub use memory::InMemoryArtifactStore;
