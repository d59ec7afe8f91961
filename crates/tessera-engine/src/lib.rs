//! # Tessera Engine
//!
//! Repository layer for Tessera artifacts: property-bag serialization,
//! proxy layers for relations, blobs and patches, and the collaborator
//! traits for persistence and blob storage.
//!
//! ## Example
//!
//! ```no_run
//! use tessera_core::{AttributeDefinition, TypeDescriptor};
//! use tessera_engine::{ArtifactEngine, ArtifactProxy, EngineConfig, PatchOperation};
//!
//! # fn main() -> Result<(), tessera_engine::EngineError> {
//! let engine = ArtifactEngine::in_memory(EngineConfig::default())?;
//! engine.register_type(
//!     TypeDescriptor::new("Note", "1.0.0").attribute("title", AttributeDefinition::string()),
//! )?;
//!
//! let note = engine.add(&engine.create("Note", None, "first", "1.0.0")?)?;
//! let note = engine.patch(&note.base().id, &[PatchOperation::add("/title", "Hello".into())])?;
//! engine.publish(&note)?;
//! # Ok(())
//! # }
//! ```

pub mod bag;
pub mod config;
pub mod engine;
pub mod error;
pub mod patch;
pub mod persistence;
pub mod proxy;
pub mod repo;
pub mod serialization;
pub mod storage;

pub use bag::{BagValue, DependencyEntry, PropertyBag};
pub use config::EngineConfig;
pub use engine::{ArtifactEngine, ArtifactHandle, EngineRepository};
pub use error::*;
pub use patch::{PatchOp, PatchOperation, apply_operation, apply_patch, parse_path};
pub use persistence::{ArtifactPersistence, InMemoryPersistence, ListQuery, SortDir};
pub use proxy::{
    ArtifactLookup, ArtifactProxy, AttributeInput, BlobUpload, DependencyProxy, LocationProxy, UpdateProxy,
};
pub use repo::{ArtifactRepo, DependencyRepo, LocationRepo, Repository, UpdateRepo};
pub use serialization::{ShowLevel, deserialize_from_db, download_link, serialize_for_client, serialize_for_db};
pub use storage::{BlobStorage, InMemoryBlobStorage, MEMORY_SCHEME, UploadReceipt};
