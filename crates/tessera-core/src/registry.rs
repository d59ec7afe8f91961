//! Artifact type registry
//!
//! The plugin side of the engine: registered [`TypeMetadata`] looked up by
//! type name or endpoint, optionally pinned to a version.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::PluginError;
use crate::types::TypeMetadata;

/// Lookup of registered artifact types
pub trait TypeRegistry: Send + Sync {
    /// Type by name; without a version the highest registered version wins
    fn get_class_by_typename(
        &self,
        type_name: &str,
        type_version: Option<&str>,
    ) -> Result<Arc<TypeMetadata>, PluginError>;

    /// Type by endpoint; without a version the highest registered version wins
    fn get_class_by_endpoint(
        &self,
        endpoint: &str,
        type_version: Option<&str>,
    ) -> Result<Arc<TypeMetadata>, PluginError>;

    /// All registered types
    fn list_types(&self) -> Vec<Arc<TypeMetadata>>;
}

fn pick<'a>(
    mut candidates: impl Iterator<Item = &'a Arc<TypeMetadata>>,
    type_version: Option<&str>,
) -> Option<Arc<TypeMetadata>> {
    match type_version {
        Some(version) => candidates.find(|m| m.type_version == version).cloned(),
        None => candidates.max_by_key(|m| m.sem_version()).cloned(),
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Registry keyed by `(type_name, type_version)`
#[derive(Default)]
pub struct InMemoryTypeRegistry {
    types: RwLock<BTreeMap<(String, String), Arc<TypeMetadata>>>,
}

impl InMemoryTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, meta: Arc<TypeMetadata>) -> Result<(), PluginError> {
        let key = (meta.type_name.clone(), meta.type_version.clone());
        let mut types = self.types.write();
        if types.contains_key(&key) {
            return Err(PluginError::DuplicateType {
                type_name: key.0,
                type_version: key.1,
            });
        }
        info!(
            type_name = %meta.type_name,
            type_version = %meta.type_version,
            endpoint = %meta.endpoint,
            "artifact type registered"
        );
        types.insert(key, meta);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl TypeRegistry for InMemoryTypeRegistry {
    fn get_class_by_typename(
        &self,
        type_name: &str,
        type_version: Option<&str>,
    ) -> Result<Arc<TypeMetadata>, PluginError> {
        let types = self.types.read();
        pick(types.values().filter(|m| m.type_name == type_name), type_version)
            .ok_or_else(|| PluginError::unknown(type_name, type_version))
    }

    fn get_class_by_endpoint(
        &self,
        endpoint: &str,
        type_version: Option<&str>,
    ) -> Result<Arc<TypeMetadata>, PluginError> {
        let types = self.types.read();
        pick(types.values().filter(|m| m.endpoint == endpoint), type_version)
            .ok_or_else(|| PluginError::UnknownEndpoint(endpoint.to_string()))
    }

    fn list_types(&self) -> Vec<Arc<TypeMetadata>> {
        self.types.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    fn registry() -> InMemoryTypeRegistry {
        let registry = InMemoryTypeRegistry::new();
        for version in ["1.0.0", "1.10.0", "1.2.0", "2.0.0-beta"] {
            registry
                .register(TypeDescriptor::new("Image", version).register().unwrap())
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_latest_version_by_semver() {
        let meta = registry().get_class_by_typename("Image", None).unwrap();
        assert_eq!(meta.type_version, "2.0.0-beta");
    }

    #[test]
    fn test_pinned_version() {
        let registry = registry();
        let meta = registry.get_class_by_typename("Image", Some("1.2.0")).unwrap();
        assert_eq!(meta.type_version, "1.2.0");
        assert!(matches!(
            registry.get_class_by_typename("Image", Some("3.0.0")),
            Err(PluginError::UnknownArtifactType { .. })
        ));
    }

    #[test]
    fn test_endpoint_lookup() {
        let registry = registry();
        assert_eq!(
            registry.get_class_by_endpoint("image", Some("1.10.0")).unwrap().type_version,
            "1.10.0"
        );
        assert!(registry.get_class_by_endpoint("images", None).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = registry();
        let err = registry
            .register(TypeDescriptor::new("Image", "1.0.0").register().unwrap())
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateType { .. }));
        assert_eq!(registry.len(), 4);
    }
}
