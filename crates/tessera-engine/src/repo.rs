//! Repository stack
//!
//! [`ArtifactRepo`] converts between artifacts and property bags. Each layer
//! above it wraps the items of the layer below in one more proxy and adds
//! the checks that proxy needs:
//!
//! ```text
//! UpdateRepo -> LocationRepo -> DependencyRepo -> ArtifactRepo -> ArtifactPersistence
//! ```

use std::sync::Arc;

use tessera_core::{Artifact, ArtifactState, DependencyError, TypeRegistry};
use tessera_logging::RequestContextGuard;
use tracing::{debug, instrument};

use crate::error::{EngineError, EngineResult, RepositoryError};
use crate::patch::{PatchOp, PatchOperation};
use crate::persistence::{ArtifactPersistence, ListQuery};
use crate::proxy::{ArtifactLookup, ArtifactProxy, DependencyProxy, LocationProxy, UpdateProxy};
use crate::serialization::{deserialize_from_db, serialize_for_db};
use crate::storage::BlobStorage;

/// Artifact lifecycle operations over some item representation
pub trait Repository: Send + Sync {
    type Item: ArtifactProxy;

    /// Wraps a base artifact in this repository's proxy chain
    fn wrap(&self, artifact: Artifact) -> Self::Item;

    fn get(&self, id: &str) -> EngineResult<Self::Item>;

    fn list(&self, query: &ListQuery) -> EngineResult<Vec<Self::Item>>;

    fn add(&self, item: &Self::Item) -> EngineResult<Self::Item>;

    fn save(&self, item: &Self::Item) -> EngineResult<Self::Item>;

    fn remove(&self, item: &Self::Item) -> EngineResult<()>;

    /// Moves a creating artifact to active; returns the refreshed item
    fn publish(&self, item: &Self::Item) -> EngineResult<Self::Item>;

    /// Active to deactivated
    fn deactivate(&self, item: &Self::Item) -> EngineResult<Self::Item>;

    /// Deactivated to active
    fn reactivate(&self, item: &Self::Item) -> EngineResult<Self::Item>;
}

// ---------------------------------------------------------------------------
// Base repository
// ---------------------------------------------------------------------------

/// Bag-level persistence of plain artifacts
#[derive(Clone)]
pub struct ArtifactRepo {
    persistence: Arc<dyn ArtifactPersistence>,
    registry: Arc<dyn TypeRegistry>,
}

impl ArtifactRepo {
    pub fn new(persistence: Arc<dyn ArtifactPersistence>, registry: Arc<dyn TypeRegistry>) -> Self {
        Self {
            persistence,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<dyn TypeRegistry> {
        &self.registry
    }

    /// Fetches an artifact constrained to a type
    pub fn get_typed(&self, id: &str, type_name: &str, type_version: Option<&str>) -> EngineResult<Artifact> {
        let bag = self.persistence.get(id, Some(type_name), type_version)?;
        deserialize_from_db(&bag, self.registry.as_ref())
    }

    fn transition(&self, item: &Artifact, from: ArtifactState, to: ArtifactState) -> EngineResult<Artifact> {
        if item.state != from {
            return Err(RepositoryError::Forbidden(format!(
                "artifact '{}' is '{}', expected '{from}'",
                item.id, item.state
            ))
            .into());
        }
        let mut changed = item.clone();
        changed.state = to;
        debug!(artifact_id = %item.id, from = %from, to = %to, "artifact state change");
        self.save(&changed)
    }
}

impl Repository for ArtifactRepo {
    type Item = Artifact;

    fn wrap(&self, artifact: Artifact) -> Artifact {
        artifact
    }

    #[instrument(skip(self), fields(artifact_id = %id))]
    fn get(&self, id: &str) -> EngineResult<Artifact> {
        let bag = self.persistence.get(id, None, None)?;
        deserialize_from_db(&bag, self.registry.as_ref())
    }

    #[instrument(skip(self, query), fields(limit = ?query.limit))]
    fn list(&self, query: &ListQuery) -> EngineResult<Vec<Artifact>> {
        self.persistence
            .list(query)?
            .iter()
            .map(|bag| deserialize_from_db(bag, self.registry.as_ref()))
            .collect()
    }

    #[instrument(skip(self, item), fields(artifact_id = %item.id, type_name = %item.type_name()))]
    fn add(&self, item: &Artifact) -> EngineResult<Artifact> {
        let bag = self.persistence.add(serialize_for_db(item))?;
        deserialize_from_db(&bag, self.registry.as_ref())
    }

    #[instrument(skip(self, item), fields(artifact_id = %item.id))]
    fn save(&self, item: &Artifact) -> EngineResult<Artifact> {
        let bag = self.persistence.save(serialize_for_db(item))?;
        deserialize_from_db(&bag, self.registry.as_ref())
    }

    #[instrument(skip(self, item), fields(artifact_id = %item.id))]
    fn remove(&self, item: &Artifact) -> EngineResult<()> {
        Ok(self.persistence.remove(&serialize_for_db(item))?)
    }

    #[instrument(skip(self, item), fields(artifact_id = %item.id))]
    fn publish(&self, item: &Artifact) -> EngineResult<Artifact> {
        let bag = self.persistence.publish(&serialize_for_db(item))?;
        deserialize_from_db(&bag, self.registry.as_ref())
    }

    fn deactivate(&self, item: &Artifact) -> EngineResult<Artifact> {
        self.transition(item, ArtifactState::Active, ArtifactState::Deactivated)
    }

    fn reactivate(&self, item: &Artifact) -> EngineResult<Artifact> {
        self.transition(item, ArtifactState::Deactivated, ArtifactState::Active)
    }
}

impl ArtifactLookup for ArtifactRepo {
    fn lookup(&self, id: &str) -> EngineResult<Artifact> {
        self.get(id).map_err(|err| match err {
            EngineError::Repository(RepositoryError::NotFound(id)) => DependencyError::NotFound(id).into(),
            other => other,
        })
    }
}

// ---------------------------------------------------------------------------
// Dependency layer
// ---------------------------------------------------------------------------

/// Guards publish and remove on the state of referenced artifacts
#[derive(Clone)]
pub struct DependencyRepo<R> {
    inner: R,
    lookup: Arc<dyn ArtifactLookup>,
    max_depth: usize,
}

impl<R: Repository> DependencyRepo<R> {
    pub fn new(inner: R, lookup: Arc<dyn ArtifactLookup>, max_depth: usize) -> Self {
        Self {
            inner,
            lookup,
            max_depth,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn rewrap(&self, item: R::Item) -> DependencyProxy<R::Item> {
        DependencyProxy::new(item, Arc::clone(&self.lookup), self.max_depth)
    }

    /// Every populated dependency must currently be active
    fn check_dependencies_active(&self, artifact: &Artifact) -> EngineResult<()> {
        for (attribute, dependencies) in artifact.populated_dependencies() {
            for dependency in dependencies {
                let current = self.lookup.lookup(&dependency.id)?;
                if current.state != ArtifactState::Active {
                    return Err(DependencyError::NotActive {
                        artifact_id: artifact.id.clone(),
                        dependency_id: dependency.id.clone(),
                        state: current.state.to_string(),
                    }
                    .into());
                }
                debug!(artifact_id = %artifact.id, attribute, dependency_id = %dependency.id, "dependency is active");
            }
        }
        Ok(())
    }
}

impl<R: Repository> Repository for DependencyRepo<R> {
    type Item = DependencyProxy<R::Item>;

    fn wrap(&self, artifact: Artifact) -> Self::Item {
        self.rewrap(self.inner.wrap(artifact))
    }

    fn get(&self, id: &str) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.get(id)?))
    }

    fn list(&self, query: &ListQuery) -> EngineResult<Vec<Self::Item>> {
        Ok(self.inner.list(query)?.into_iter().map(|item| self.rewrap(item)).collect())
    }

    fn add(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.add(item.inner())?))
    }

    fn save(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.save(item.inner())?))
    }

    #[instrument(skip(self, item), fields(artifact_id = %item.base().id))]
    fn remove(&self, item: &Self::Item) -> EngineResult<()> {
        if let Some((attribute, _)) = item.base().populated_dependencies().first() {
            return Err(DependencyError::PopulatedDependency {
                attribute: attribute.to_string(),
            }
            .into());
        }
        self.inner.remove(item.inner())
    }

    #[instrument(skip(self, item), fields(artifact_id = %item.base().id))]
    fn publish(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        let artifact = item.base();
        artifact.validate_publish()?;
        self.check_dependencies_active(artifact)?;
        Ok(self.rewrap(self.inner.publish(item.inner())?))
    }

    fn deactivate(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.deactivate(item.inner())?))
    }

    fn reactivate(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.reactivate(item.inner())?))
    }
}

// ---------------------------------------------------------------------------
// Location layer
// ---------------------------------------------------------------------------

/// Hands out items whose blob attributes go through blob storage
#[derive(Clone)]
pub struct LocationRepo<R> {
    inner: R,
    storage: Arc<dyn BlobStorage>,
}

impl<R: Repository> LocationRepo<R> {
    pub fn new(inner: R, storage: Arc<dyn BlobStorage>) -> Self {
        Self { inner, storage }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn storage(&self) -> &Arc<dyn BlobStorage> {
        &self.storage
    }

    fn rewrap(&self, item: R::Item) -> LocationProxy<R::Item> {
        LocationProxy::new(item, Arc::clone(&self.storage))
    }
}

impl<R: Repository> Repository for LocationRepo<R> {
    type Item = LocationProxy<R::Item>;

    fn wrap(&self, artifact: Artifact) -> Self::Item {
        self.rewrap(self.inner.wrap(artifact))
    }

    fn get(&self, id: &str) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.get(id)?))
    }

    fn list(&self, query: &ListQuery) -> EngineResult<Vec<Self::Item>> {
        Ok(self.inner.list(query)?.into_iter().map(|item| self.rewrap(item)).collect())
    }

    fn add(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.add(item.inner())?))
    }

    fn save(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.save(item.inner())?))
    }

    fn remove(&self, item: &Self::Item) -> EngineResult<()> {
        self.inner.remove(item.inner())
    }

    fn publish(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.publish(item.inner())?))
    }

    fn deactivate(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.deactivate(item.inner())?))
    }

    fn reactivate(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.reactivate(item.inner())?))
    }
}

// ---------------------------------------------------------------------------
// Update layer
// ---------------------------------------------------------------------------

/// Outermost repository: items accept patches
#[derive(Clone)]
pub struct UpdateRepo<R> {
    inner: R,
    allowed_ops: Vec<PatchOp>,
}

impl<R: Repository> UpdateRepo<R> {
    pub fn new(inner: R, allowed_ops: Vec<PatchOp>) -> Self {
        Self { inner, allowed_ops }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn rewrap(&self, item: R::Item) -> UpdateProxy<R::Item> {
        UpdateProxy::new(item, self.allowed_ops.clone())
    }

    /// Fetches `id`, applies `ops` and saves the result
    ///
    /// Nothing is saved when an operation fails.
    #[instrument(skip(self, ops), fields(artifact_id = %id, ops = ops.len()))]
    pub fn patch(&self, id: &str, ops: &[PatchOperation]) -> EngineResult<UpdateProxy<R::Item>> {
        let _context = RequestContextGuard::for_artifact(id);
        let mut item = self.get(id)?;
        item.apply_patch(ops)?;
        self.save(&item)
    }
}

impl<R: Repository> Repository for UpdateRepo<R> {
    type Item = UpdateProxy<R::Item>;

    fn wrap(&self, artifact: Artifact) -> Self::Item {
        self.rewrap(self.inner.wrap(artifact))
    }

    fn get(&self, id: &str) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.get(id)?))
    }

    fn list(&self, query: &ListQuery) -> EngineResult<Vec<Self::Item>> {
        Ok(self.inner.list(query)?.into_iter().map(|item| self.rewrap(item)).collect())
    }

    fn add(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.add(item.inner())?))
    }

    fn save(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.save(item.inner())?))
    }

    fn remove(&self, item: &Self::Item) -> EngineResult<()> {
        self.inner.remove(item.inner())
    }

    fn publish(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.publish(item.inner())?))
    }

    fn deactivate(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.deactivate(item.inner())?))
    }

    fn reactivate(&self, item: &Self::Item) -> EngineResult<Self::Item> {
        Ok(self.rewrap(self.inner.reactivate(item.inner())?))
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::{AttributeDefinition, InMemoryTypeRegistry, TypeDescriptor, TypeMetadata, Value};

    use super::*;
    use crate::persistence::InMemoryPersistence;
    use crate::proxy::AttributeInput;

    fn setup() -> (ArtifactRepo, Arc<TypeMetadata>) {
        let meta = TypeDescriptor::new("Doc", "1.0.0")
            .attribute("title", AttributeDefinition::string())
            .attribute("depends_on", AttributeDefinition::relation())
            .register()
            .unwrap();
        let registry = InMemoryTypeRegistry::new();
        registry.register(Arc::clone(&meta)).unwrap();
        let repo = ArtifactRepo::new(Arc::new(InMemoryPersistence::new()), Arc::new(registry));
        (repo, meta)
    }

    #[test]
    fn test_base_round_trip() {
        let (repo, meta) = setup();
        let mut doc = Artifact::create(meta, "doc", "1.0.0").unwrap();
        doc.set("title", Some(Value::from("Hello"))).unwrap();
        let added = repo.add(&doc).unwrap();
        assert_eq!(added.peek("title"), Some(&Value::from("Hello")));

        let fetched = repo.get(&doc.id).unwrap();
        assert_eq!(fetched.id, doc.id);
        assert_eq!(fetched.state, ArtifactState::Creating);
    }

    #[test]
    fn test_lookup_maps_not_found() {
        let (repo, _) = setup();
        let err = repo.lookup("missing").unwrap_err();
        assert!(matches!(err, EngineError::Dependency(DependencyError::NotFound(_))));
    }

    #[test]
    fn test_deactivate_requires_active() {
        let (repo, meta) = setup();
        let doc = repo.add(&Artifact::create(meta, "doc", "1.0.0").unwrap()).unwrap();
        assert!(matches!(
            repo.deactivate(&doc),
            Err(EngineError::Repository(RepositoryError::Forbidden(_)))
        ));

        let active = repo.publish(&doc).unwrap();
        let inactive = repo.deactivate(&active).unwrap();
        assert_eq!(inactive.state, ArtifactState::Deactivated);
        let active = repo.reactivate(&inactive).unwrap();
        assert_eq!(active.state, ArtifactState::Active);
    }

    #[test]
    fn test_dependency_layer_guards_publish_and_remove() {
        let (base, meta) = setup();
        let repo = DependencyRepo::new(base.clone(), Arc::new(base), 8);

        let target = repo.add(&repo.wrap(Artifact::create(Arc::clone(&meta), "a", "1.0.0").unwrap())).unwrap();
        let mut source = repo.wrap(Artifact::create(meta, "b", "1.0.0").unwrap());
        source
            .set_attribute("depends_on", AttributeInput::Reference(target.base().id.clone()))
            .unwrap();
        let source = repo.add(&source).unwrap();

        let err = repo.publish(&source).unwrap_err();
        assert!(matches!(err, EngineError::Dependency(DependencyError::NotActive { .. })));

        repo.publish(&target).unwrap();
        let published = repo.publish(&source).unwrap();
        assert_eq!(published.base().state, ArtifactState::Active);

        let err = repo.remove(&published).unwrap_err();
        assert!(matches!(err, EngineError::Dependency(DependencyError::PopulatedDependency { .. })));
    }
}
