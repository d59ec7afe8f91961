//! Proxy layers around an artifact
//!
//! Every fetched artifact is wrapped as
//! `UpdateProxy<LocationProxy<DependencyProxy<Artifact>>>`. Each layer
//! intercepts the attribute writes it owns and forwards the rest inward:
//!
//! - [`DependencyProxy`]: resolves relation ids and rejects self-references
//! - [`LocationProxy`]: uploads blob data and records its locations
//! - [`UpdateProxy`]: applies patch operations through the layers below

mod dependency;
mod location;
mod update;

pub use dependency::DependencyProxy;
pub use location::LocationProxy;
pub use update::UpdateProxy;

use bytes::Bytes;
use tessera_core::{Artifact, ArtifactLayer, ValidationError, Value};

use crate::error::EngineResult;

/// Blob data handed to the location proxy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobUpload {
    pub data: Bytes,
    /// Size announced by the caller; the backend resolves it when absent
    pub size: Option<u64>,
}

impl BlobUpload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// What may be assigned to an attribute through a proxy chain
pub enum AttributeInput {
    /// A ready value; `None` clears the attribute
    Value(Option<Value>),
    /// Id of the artifact a scalar relation should point to
    Reference(String),
    /// Ids for a list relation
    References(Vec<String>),
    /// Another (possibly proxied) artifact for a scalar relation
    Layered(Box<dyn ArtifactLayer + Send>),
    /// Data for a scalar blob attribute
    Upload(BlobUpload),
    /// Data for a list-of-blobs attribute, one upload per item
    Uploads(Vec<BlobUpload>),
}

impl AttributeInput {
    pub fn layered(layer: impl ArtifactLayer + Send + 'static) -> Self {
        AttributeInput::Layered(Box::new(layer))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AttributeInput::Value(_) => "value",
            AttributeInput::Reference(_) => "reference",
            AttributeInput::References(_) => "references",
            AttributeInput::Layered(_) => "artifact",
            AttributeInput::Upload(_) => "upload",
            AttributeInput::Uploads(_) => "uploads",
        }
    }

    /// Error for an input the receiving layer cannot interpret
    pub fn unsupported(&self, attribute: &str) -> ValidationError {
        ValidationError::new(attribute, format!("Attribute does not accept {} input", self.kind()))
    }
}

impl From<Value> for AttributeInput {
    fn from(value: Value) -> Self {
        AttributeInput::Value(Some(value))
    }
}

impl From<Option<Value>> for AttributeInput {
    fn from(value: Option<Value>) -> Self {
        AttributeInput::Value(value)
    }
}

/// An artifact, possibly wrapped in proxy layers
pub trait ArtifactProxy: ArtifactLayer {
    fn base(&self) -> &Artifact;

    fn base_mut(&mut self) -> &mut Artifact;

    fn set_attribute(&mut self, name: &str, input: AttributeInput) -> EngineResult<()>;

    fn get_attribute(&mut self, name: &str) -> EngineResult<Option<&Value>> {
        Ok(self.base_mut().get(name)?)
    }
}

impl ArtifactProxy for Artifact {
    fn base(&self) -> &Artifact {
        self
    }

    fn base_mut(&mut self) -> &mut Artifact {
        self
    }

    fn set_attribute(&mut self, name: &str, input: AttributeInput) -> EngineResult<()> {
        match input {
            AttributeInput::Value(value) => Ok(self.set(name, value)?),
            other => Err(other.unsupported(name).into()),
        }
    }
}

/// Fetches base artifacts by id for relation resolution
pub trait ArtifactLookup: Send + Sync {
    fn lookup(&self, id: &str) -> EngineResult<Artifact>;
}
