//! Proxy layer unwrapping
//!
//! Repository proxies wrap an artifact in layers. Code that needs the
//! innermost artifact (dependency storage, identity checks) walks the layers
//! through [`ArtifactLayer::unwrap_layer`] with a bounded depth.

use crate::artifact::Artifact;
use crate::error::DependencyError;

/// Default bound on the number of layers walked by [`unwrap_to_base`]
pub const DEFAULT_MAX_UNWRAP_DEPTH: usize = 8;

/// Result of peeling one layer
pub enum Unwrapped<'a> {
    /// Another proxy layer
    Layer(&'a dyn ArtifactLayer),
    /// The innermost artifact
    Base(&'a Artifact),
}

/// Implemented by the base artifact and every proxy around it
pub trait ArtifactLayer {
    fn unwrap_layer(&self) -> Unwrapped<'_>;
}

impl ArtifactLayer for Artifact {
    fn unwrap_layer(&self) -> Unwrapped<'_> {
        Unwrapped::Base(self)
    }
}

/// Walks proxy layers until the base artifact is reached
pub fn unwrap_to_base(layer: &dyn ArtifactLayer, max_depth: usize) -> Result<&Artifact, DependencyError> {
    let mut current = layer;
    for _ in 0..=max_depth {
        match current.unwrap_layer() {
            Unwrapped::Base(artifact) => return Ok(artifact),
            Unwrapped::Layer(inner) => current = inner,
        }
    }
    Err(DependencyError::UnwrapDepthExceeded { depth: max_depth })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    struct Wrap(Box<dyn ArtifactLayer>);

    impl ArtifactLayer for Wrap {
        fn unwrap_layer(&self) -> Unwrapped<'_> {
            Unwrapped::Layer(self.0.as_ref())
        }
    }

    fn wrapped(layers: usize) -> Box<dyn ArtifactLayer> {
        let meta = TypeDescriptor::new("Empty", "1.0.0").register().unwrap();
        let mut layer: Box<dyn ArtifactLayer> = Box::new(Artifact::blank(meta, "base"));
        for _ in 0..layers {
            layer = Box::new(Wrap(layer));
        }
        layer
    }

    #[test]
    fn test_unwrap_reaches_base() {
        let layer = wrapped(3);
        assert_eq!(unwrap_to_base(layer.as_ref(), 3).unwrap().id, "base");
        assert_eq!(unwrap_to_base(wrapped(0).as_ref(), 0).unwrap().id, "base");
    }

    #[test]
    fn test_unwrap_depth_bound() {
        let layer = wrapped(DEFAULT_MAX_UNWRAP_DEPTH + 1);
        assert_eq!(
            unwrap_to_base(layer.as_ref(), DEFAULT_MAX_UNWRAP_DEPTH).unwrap_err(),
            DependencyError::UnwrapDepthExceeded {
                depth: DEFAULT_MAX_UNWRAP_DEPTH
            }
        );
    }
}
