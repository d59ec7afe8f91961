use std::fmt;

use tessera_core::{Artifact, ArtifactLayer, PathError, Unwrapped};
use tracing::debug;

use super::{ArtifactProxy, AttributeInput};
use crate::error::EngineResult;
use crate::patch::{self, PatchOp, PatchOperation};

/// Outermost layer: applies patch operations through the chain below
#[derive(Clone)]
pub struct UpdateProxy<P> {
    inner: P,
    allowed_ops: Vec<PatchOp>,
}

impl<P: ArtifactProxy> UpdateProxy<P> {
    pub fn new(inner: P, allowed_ops: Vec<PatchOp>) -> Self {
        Self { inner, allowed_ops }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    pub fn allowed_ops(&self) -> &[PatchOp] {
        &self.allowed_ops
    }

    /// Applies `ops` in order
    ///
    /// An op outside the allow-list fails before touching the artifact.
    /// Earlier operations stay applied when a later one fails.
    pub fn apply_patch(&mut self, ops: &[PatchOperation]) -> EngineResult<()> {
        for operation in ops {
            if !self.allowed_ops.contains(&operation.op) {
                return Err(PathError::new(
                    &operation.path,
                    format!("Operation '{}' is not allowed", operation.op),
                )
                .into());
            }
            patch::apply_operation(&mut self.inner, operation)?;
        }
        debug!(artifact_id = %self.base().id, ops = ops.len(), "patch applied");
        Ok(())
    }
}

impl<P: ArtifactProxy> ArtifactLayer for UpdateProxy<P> {
    fn unwrap_layer(&self) -> Unwrapped<'_> {
        Unwrapped::Layer(&self.inner)
    }
}

impl<P: ArtifactProxy> ArtifactProxy for UpdateProxy<P> {
    fn base(&self) -> &Artifact {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut Artifact {
        self.inner.base_mut()
    }

    fn set_attribute(&mut self, name: &str, input: AttributeInput) -> EngineResult<()> {
        self.inner.set_attribute(name, input)
    }
}

impl<P: fmt::Debug> fmt::Debug for UpdateProxy<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateProxy")
            .field("inner", &self.inner)
            .field("allowed_ops", &self.allowed_ops)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tessera_core::{AttributeDefinition, TypeDescriptor, Value};

    use super::*;
    use crate::error::EngineError;

    fn proxy(allowed: Vec<PatchOp>) -> UpdateProxy<Artifact> {
        let meta = TypeDescriptor::new("Note", "1.0.0")
            .attribute("title", AttributeDefinition::string().max_length(5))
            .register()
            .unwrap();
        UpdateProxy::new(Artifact::create(meta, "note", "1.0.0").unwrap(), allowed)
    }

    #[test]
    fn test_disallowed_op_rejected() {
        let mut p = proxy(vec![PatchOp::Replace]);
        let err = p
            .apply_patch(&[PatchOperation::add("/title", json!("x"))])
            .unwrap_err();
        match err {
            EngineError::Path(err) => assert_eq!(err.message, "Operation 'add' is not allowed"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(p.base().peek("title"), None);
    }

    #[test]
    fn test_batch_is_not_rolled_back() {
        let mut p = proxy(vec![PatchOp::Add, PatchOp::Replace, PatchOp::Remove]);
        let err = p.apply_patch(&[
            PatchOperation::replace("/title", json!("abc")),
            PatchOperation::replace("/title", json!("abcdef")),
        ]);
        assert!(matches!(err, Err(EngineError::Validation(_))));
        assert_eq!(p.base().peek("title"), Some(&Value::from("abc")));
    }
}
