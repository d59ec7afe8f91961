//! # Tessera Core
//!
//! Typed artifact model: declarative attribute definitions, the type
//! declaration builder and validated artifact instances.
//!
//! ## Key Types
//!
//! - [`AttributeDefinition`]: One typed attribute with its ordered validators
//! - [`TypeDescriptor`]: Builder that registers an artifact type
//! - [`TypeMetadata`]: Frozen type schema with its [`AttributeRegistry`]
//! - [`Artifact`]: An instance enforcing its type's constraints on read/write
//! - [`ListGuard`] / [`DictGuard`]: Collection views re-validating every mutation
//!
//! ## Key Traits
//!
//! - [`TypeRegistry`]: Lookup of registered types by name or endpoint
//! - [`ArtifactLayer`]: Bounded unwrapping of proxy layers to the base artifact

pub mod artifact;
pub mod attribute;
pub mod blob;
pub mod error;
pub mod guard;
pub mod layer;
pub mod registry;
pub mod types;
pub mod value;
pub mod version;

pub use artifact::{Artifact, ArtifactState, Visibility};
pub use attribute::{
    AttributeDefinition, AttributeKind, DictValues, ListItems, RelationSpec, Rule, ScalarKind, Section, Shape,
    Validator,
};
pub use blob::{Blob, BlobLocation, LocationStatus};
pub use error::*;
pub use guard::{DictAccess, DictGuard, FrozenDict, FrozenList, ListAccess, ListGuard};
pub use layer::{ArtifactLayer, DEFAULT_MAX_UNWRAP_DEPTH, Unwrapped, unwrap_to_base};
pub use registry::{InMemoryTypeRegistry, TypeRegistry};
pub use types::{Accessor, AttributeRegistry, COMMON_FIELDS, Mutability, Slot, TypeDescriptor, TypeMetadata};
pub use value::{DbType, Value, format_datetime};
pub use version::SemVer;
