use std::fmt;
use std::sync::Arc;

use tessera_core::{
    Artifact, ArtifactLayer, DependencyError, Section, Unwrapped, ValidationError, Value, unwrap_to_base,
};
use tracing::debug;

use super::{ArtifactLookup, ArtifactProxy, AttributeInput};
use crate::error::EngineResult;

/// Resolves relation attributes
///
/// Ids are fetched through the lookup, proxied artifacts are unwrapped to
/// their base, and an artifact referencing itself is rejected at assignment.
#[derive(Clone)]
pub struct DependencyProxy<P> {
    inner: P,
    lookup: Arc<dyn ArtifactLookup>,
    max_depth: usize,
}

impl<P: ArtifactProxy> DependencyProxy<P> {
    pub fn new(inner: P, lookup: Arc<dyn ArtifactLookup>, max_depth: usize) -> Self {
        Self {
            inner,
            lookup,
            max_depth,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    /// Artifacts currently referenced by a dependency attribute
    pub fn dependencies(&self, name: &str) -> Vec<&Artifact> {
        match self.inner.base().peek(name) {
            Some(Value::Artifact(dep)) => vec![dep.as_ref()],
            Some(Value::List(items)) => items.iter().filter_map(Value::as_artifact).collect(),
            _ => Vec::new(),
        }
    }

    fn check_not_self(&self, attribute: &str, candidate: &Artifact) -> Result<(), DependencyError> {
        let own_id = &self.inner.base().id;
        if &candidate.id == own_id {
            return Err(DependencyError::Circular {
                artifact_id: own_id.clone(),
                attribute: attribute.to_string(),
            });
        }
        Ok(())
    }

    fn resolve_id(&self, attribute: &str, id: &str) -> EngineResult<Artifact> {
        let own_id = &self.inner.base().id;
        if id == own_id {
            return Err(DependencyError::Circular {
                artifact_id: own_id.clone(),
                attribute: attribute.to_string(),
            }
            .into());
        }
        let fetched = self.lookup.lookup(id)?;
        let base = unwrap_to_base(&fetched, self.max_depth)?.clone();
        self.check_not_self(attribute, &base)?;
        Ok(base)
    }

    fn resolve(&self, attribute: &str, is_list: bool, input: AttributeInput) -> EngineResult<Option<Value>> {
        let wrap = |artifacts: Vec<Artifact>| -> EngineResult<Option<Value>> {
            let mut values = artifacts.into_iter().map(|a| Value::Artifact(Box::new(a)));
            if is_list {
                Ok(Some(Value::List(values.collect())))
            } else {
                Ok(values.next())
            }
        };

        match input {
            AttributeInput::Reference(id) => wrap(vec![self.resolve_id(attribute, &id)?]),
            AttributeInput::References(ids) => {
                if !is_list {
                    return Err(ValidationError::new(attribute, "Attribute is not a list").into());
                }
                let resolved = ids
                    .iter()
                    .map(|id| self.resolve_id(attribute, id))
                    .collect::<EngineResult<Vec<_>>>()?;
                wrap(resolved)
            }
            AttributeInput::Layered(layer) => {
                let base = unwrap_to_base(layer.as_ref(), self.max_depth)?;
                self.check_not_self(attribute, base)?;
                wrap(vec![base.clone()])
            }
            AttributeInput::Value(Some(value)) => {
                match &value {
                    Value::Artifact(dep) => self.check_not_self(attribute, dep)?,
                    Value::List(items) => {
                        for dep in items.iter().filter_map(Value::as_artifact) {
                            self.check_not_self(attribute, dep)?;
                        }
                    }
                    _ => {}
                }
                Ok(Some(value))
            }
            AttributeInput::Value(None) => Ok(None),
            other => Err(other.unsupported(attribute).into()),
        }
    }
}

impl<P: ArtifactProxy> ArtifactLayer for DependencyProxy<P> {
    fn unwrap_layer(&self) -> Unwrapped<'_> {
        Unwrapped::Layer(&self.inner)
    }
}

impl<P: ArtifactProxy> ArtifactProxy for DependencyProxy<P> {
    fn base(&self) -> &Artifact {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut Artifact {
        self.inner.base_mut()
    }

    fn set_attribute(&mut self, name: &str, input: AttributeInput) -> EngineResult<()> {
        let accessor = self
            .base()
            .type_meta()
            .accessor(name)
            .cloned()
            .ok_or_else(|| ValidationError::unknown_property(name))?;
        if accessor.section() != Section::Dependency {
            return self.inner.set_attribute(name, input);
        }

        let value = self.resolve(name, accessor.definition().is_list(), input)?;
        debug!(
            artifact_id = %self.base().id,
            attribute = name,
            populated = value.is_some(),
            "resolved dependency"
        );
        self.inner.set_attribute(name, AttributeInput::Value(value))
    }
}

impl<P: fmt::Debug> fmt::Debug for DependencyProxy<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyProxy")
            .field("inner", &self.inner)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tessera_core::{AttributeDefinition, TypeDescriptor, TypeMetadata};

    use super::*;
    use crate::error::{EngineError, RepositoryError};

    #[derive(Default)]
    struct MapLookup(HashMap<String, Artifact>);

    impl ArtifactLookup for MapLookup {
        fn lookup(&self, id: &str) -> EngineResult<Artifact> {
            self.0
                .get(id)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()).into())
        }
    }

    fn node_type() -> Arc<TypeMetadata> {
        TypeDescriptor::new("Node", "1.0.0")
            .attribute("depends_on", AttributeDefinition::relation())
            .attribute("links", AttributeDefinition::relation_list())
            .attribute("label", AttributeDefinition::string())
            .register()
            .unwrap()
    }

    fn proxy_with(others: &[&Artifact]) -> DependencyProxy<Artifact> {
        let meta = node_type();
        let lookup = MapLookup(others.iter().map(|a| (a.id.clone(), (*a).clone())).collect());
        DependencyProxy::new(Artifact::create(meta, "self", "1.0.0").unwrap(), Arc::new(lookup), 8)
    }

    #[test]
    fn test_reference_resolved_to_artifact() {
        let other = Artifact::create(node_type(), "other", "1.0.0").unwrap();
        let mut proxy = proxy_with(&[&other]);
        proxy
            .set_attribute("depends_on", AttributeInput::Reference(other.id.clone()))
            .unwrap();
        assert_eq!(proxy.dependencies("depends_on")[0].id, other.id);
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut proxy = proxy_with(&[]);
        let own_id = proxy.base().id.clone();
        let err = proxy
            .set_attribute("depends_on", AttributeInput::Reference(own_id))
            .unwrap_err();
        assert!(matches!(err, EngineError::Dependency(DependencyError::Circular { .. })));

        let copy = proxy.base().clone();
        let err = proxy
            .set_attribute("depends_on", AttributeInput::layered(copy))
            .unwrap_err();
        assert!(matches!(err, EngineError::Dependency(DependencyError::Circular { .. })));
    }

    #[test]
    fn test_reference_list() {
        let a = Artifact::create(node_type(), "a", "1.0.0").unwrap();
        let b = Artifact::create(node_type(), "b", "1.0.0").unwrap();
        let mut proxy = proxy_with(&[&a, &b]);
        proxy
            .set_attribute("links", AttributeInput::References(vec![a.id.clone(), b.id.clone()]))
            .unwrap();
        assert_eq!(proxy.dependencies("links").len(), 2);

        let err = proxy
            .set_attribute("depends_on", AttributeInput::References(vec![a.id.clone()]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_unknown_reference() {
        let mut proxy = proxy_with(&[]);
        let err = proxy
            .set_attribute("depends_on", AttributeInput::Reference("missing".to_string()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Repository(RepositoryError::NotFound(_))));
    }

    #[test]
    fn test_properties_pass_through() {
        let mut proxy = proxy_with(&[]);
        proxy
            .set_attribute("label", AttributeInput::from(Value::from("x")))
            .unwrap();
        assert_eq!(proxy.base().peek("label"), Some(&Value::from("x")));
    }
}
