//! Binary object descriptors
//!
//! A [`Blob`] never holds bytes. It records where the bytes were placed by
//! the storage backend, how large they are and how to find them again.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

/// Lifecycle of one stored copy of a blob
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    #[default]
    Active,
    PendingDelete,
    Deleted,
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationStatus::Active => write!(f, "active"),
            LocationStatus::PendingDelete => write!(f, "pending_delete"),
            LocationStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// One place the blob's bytes can be read from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation {
    /// Backend-specific location token
    pub value: String,
    pub status: LocationStatus,
}

impl BlobLocation {
    pub fn active(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status: LocationStatus::Active,
        }
    }
}

/// Binary object descriptor stored in a blob attribute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub size: u64,
    /// Ordered; readers try each location in turn
    pub locations: Vec<BlobLocation>,
    pub checksum: Option<String>,
    /// Opaque storage key, usually `<artifact_id>.<attribute>[.<uuid>]`
    pub item_key: String,
}

impl Blob {
    pub fn new(item_key: impl Into<String>, size: u64, checksum: Option<String>) -> Self {
        Self {
            size,
            locations: Vec::new(),
            checksum,
            item_key: item_key.into(),
        }
    }

    pub fn with_location(mut self, location: BlobLocation) -> Self {
        self.locations.push(location);
        self
    }

    /// Locations still eligible for reads
    pub fn active_locations(&self) -> impl Iterator<Item = &BlobLocation> {
        self.locations
            .iter()
            .filter(|l| l.status == LocationStatus::Active)
    }

    /// Structural rendering used by client serialization
    pub fn to_dict(&self) -> JsonValue {
        json!({
            "size": self.size,
            "checksum": self.checksum,
            "item_key": self.item_key,
            "locations": self
                .locations
                .iter()
                .map(|l| json!({"value": l.value, "status": l.status.to_string()}))
                .collect::<Vec<_>>(),
        })
    }
}
