//! Engine facade
//!
//! [`ArtifactEngine`] owns the collaborators and the repository stack
//! assembled from an [`EngineConfig`]. Every artifact it hands out is an
//! [`ArtifactHandle`].

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tessera_core::{Artifact, InMemoryTypeRegistry, TypeDescriptor, TypeMetadata, TypeRegistry, Value};
use tessera_logging::{LoggingError, TesseraSubscriberBuilder, WorkerGuard};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineResult, PluginError};
use crate::patch::PatchOperation;
use crate::persistence::{ArtifactPersistence, InMemoryPersistence, ListQuery};
use crate::proxy::{ArtifactProxy, DependencyProxy, LocationProxy, UpdateProxy};
use crate::repo::{ArtifactRepo, DependencyRepo, LocationRepo, Repository, UpdateRepo};
use crate::serialization::{self, ShowLevel};
use crate::storage::{BlobStorage, InMemoryBlobStorage};

/// An artifact wrapped in the full proxy chain
pub type ArtifactHandle = UpdateProxy<LocationProxy<DependencyProxy<Artifact>>>;

/// The full repository stack
pub type EngineRepository = UpdateRepo<LocationRepo<DependencyRepo<ArtifactRepo>>>;

pub struct ArtifactEngine {
    config: EngineConfig,
    registry: Arc<InMemoryTypeRegistry>,
    repository: EngineRepository,
}

impl ArtifactEngine {
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn ArtifactPersistence>,
        storage: Arc<dyn BlobStorage>,
        registry: Arc<InMemoryTypeRegistry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let type_registry: Arc<dyn TypeRegistry> = Arc::clone(&registry) as Arc<dyn TypeRegistry>;
        let base = ArtifactRepo::new(persistence, type_registry);
        let repository = UpdateRepo::new(
            LocationRepo::new(
                DependencyRepo::new(base.clone(), Arc::new(base), config.max_unwrap_depth),
                storage,
            ),
            config.allowed_patch_ops.clone(),
        );
        Ok(Self {
            config,
            registry,
            repository,
        })
    }

    /// Engine over in-memory persistence, blob storage and type registry
    pub fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        Self::new(
            config,
            Arc::new(InMemoryPersistence::new()),
            Arc::new(InMemoryBlobStorage::new()),
            Arc::new(InMemoryTypeRegistry::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Installs the global subscriber described by the `[logging]` section
    ///
    /// Hosts that bring their own subscriber skip this. Fails if a global
    /// subscriber is already set; keep the returned guard alive while file
    /// output is wanted.
    pub fn init_logging(&self) -> Result<Option<WorkerGuard>, LoggingError> {
        let guard = TesseraSubscriberBuilder::new()
            .with_config(self.config.logging.clone())
            .try_init()?;
        info!(level = %self.config.logging.default_level, "engine logging initialized");
        Ok(guard)
    }

    pub fn registry(&self) -> &Arc<InMemoryTypeRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &EngineRepository {
        &self.repository
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    /// Registers a type declaration
    ///
    /// Root types without their own mutability rule are mutable while in the
    /// configured `mutable_state`.
    pub fn register_type(&self, descriptor: TypeDescriptor) -> EngineResult<Arc<TypeMetadata>> {
        let descriptor = if descriptor.has_mutability() || descriptor.has_parent() {
            descriptor
        } else {
            descriptor.mutable_while(self.config.mutable_state)
        };
        let meta = descriptor.register()?;
        self.registry.register(Arc::clone(&meta))?;
        Ok(meta)
    }

    /// Schema of a registered type for client discovery
    pub fn schema(&self, type_name: &str, type_version: Option<&str>) -> Result<JsonValue, PluginError> {
        Ok(self.registry.get_class_by_typename(type_name, type_version)?.schema())
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// New, unsaved artifact of a registered type
    pub fn create(
        &self,
        type_name: &str,
        type_version: Option<&str>,
        name: &str,
        version: &str,
    ) -> EngineResult<ArtifactHandle> {
        let meta = self.registry.get_class_by_typename(type_name, type_version)?;
        let artifact = Artifact::create(meta, name, version)?;
        info!(artifact_id = %artifact.id, type_name, "artifact created");
        Ok(self.repository.wrap(artifact))
    }

    pub fn wrap(&self, artifact: Artifact) -> ArtifactHandle {
        self.repository.wrap(artifact)
    }

    pub fn get(&self, id: &str) -> EngineResult<ArtifactHandle> {
        self.repository.get(id)
    }

    pub fn list(&self, query: &ListQuery) -> EngineResult<Vec<ArtifactHandle>> {
        self.repository.list(query)
    }

    pub fn add(&self, handle: &ArtifactHandle) -> EngineResult<ArtifactHandle> {
        self.repository.add(handle)
    }

    pub fn save(&self, handle: &ArtifactHandle) -> EngineResult<ArtifactHandle> {
        self.repository.save(handle)
    }

    pub fn remove(&self, handle: &ArtifactHandle) -> EngineResult<()> {
        self.repository.remove(handle)
    }

    pub fn publish(&self, handle: &ArtifactHandle) -> EngineResult<ArtifactHandle> {
        self.repository.publish(handle)
    }

    pub fn deactivate(&self, handle: &ArtifactHandle) -> EngineResult<ArtifactHandle> {
        self.repository.deactivate(handle)
    }

    pub fn reactivate(&self, handle: &ArtifactHandle) -> EngineResult<ArtifactHandle> {
        self.repository.reactivate(handle)
    }

    /// Fetches, patches and saves `id`
    pub fn patch(&self, id: &str, ops: &[PatchOperation]) -> EngineResult<ArtifactHandle> {
        self.repository.patch(id, ops)
    }

    /// Referenced artifacts of a dependency attribute, each in its own chain
    pub fn dependencies(&self, handle: &ArtifactHandle, name: &str) -> Vec<ArtifactHandle> {
        let referenced: Vec<Artifact> = match handle.base().peek(name) {
            Some(Value::Artifact(dep)) => vec![dep.as_ref().clone()],
            Some(Value::List(items)) => items.iter().filter_map(Value::as_artifact).cloned().collect(),
            _ => Vec::new(),
        };
        referenced.into_iter().map(|dep| self.wrap(dep)).collect()
    }

    /// Data of a blob attribute
    pub fn read_blob(&self, handle: &ArtifactHandle, name: &str, index: Option<usize>) -> EngineResult<Bytes> {
        handle.inner().read_blob(name, index)
    }

    /// Client rendering; `level` falls back to the configured default
    pub fn serialize_for_client(&self, handle: &ArtifactHandle, level: Option<ShowLevel>) -> JsonValue {
        serialization::serialize_for_client(
            handle.base(),
            level.unwrap_or(self.config.default_show_level),
            self.config.url_prefix(),
        )
    }
}
