//! Property bag: the schema-less persistence shape of an artifact
//!
//! ```text
//! {
//!   <common fields>,
//!   "properties":   { "<name>[.<key>]": { "type": <db type>, "value": <json> } },
//!   "blobs":        { "<name>": [ { size, locations, checksum, item_key } ] },
//!   "dependencies": { "<name>": [ "<id>" | <nested bag> ] }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tessera_core::{ArtifactState, Blob, DbType, Visibility};

/// One typed entry of the `properties` sub-bag
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BagValue {
    #[serde(rename = "type")]
    pub db_type: DbType,
    pub value: JsonValue,
}

impl BagValue {
    pub fn new(db_type: DbType, value: JsonValue) -> Self {
        Self { db_type, value }
    }

    /// Placeholder written for declared keys that have no value
    pub fn null(db_type: DbType) -> Self {
        Self::new(db_type, JsonValue::Null)
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

/// A dependency as stored (an id) or as fetched (the referenced bag)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyEntry {
    Id(String),
    Expanded(Box<PropertyBag>),
}

impl DependencyEntry {
    pub fn id(&self) -> &str {
        match self {
            DependencyEntry::Id(id) => id,
            DependencyEntry::Expanded(bag) => &bag.id,
        }
    }

    /// The stored form of this entry
    pub fn collapsed(&self) -> Self {
        DependencyEntry::Id(self.id().to_string())
    }
}

/// Generic persisted form of any artifact type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyBag {
    pub id: String,
    pub name: String,
    pub version: String,
    pub type_name: String,
    pub type_version: String,
    pub visibility: Visibility,
    pub state: ArtifactState,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, BagValue>,
    #[serde(default)]
    pub blobs: BTreeMap<String, Vec<Blob>>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<DependencyEntry>>,
}

impl PropertyBag {
    /// Ids referenced by every dependency attribute
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.values().flatten().map(DependencyEntry::id)
    }

    /// Copy with every dependency reduced to its id
    pub fn collapsed(&self) -> Self {
        let mut bag = self.clone();
        for entries in bag.dependencies.values_mut() {
            *entries = entries.iter().map(DependencyEntry::collapsed).collect();
        }
        bag
    }
}
