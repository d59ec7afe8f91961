//! Persistence collaborator
//!
//! [`ArtifactPersistence`] stores property bags. Bags are stored with
//! dependencies reduced to ids and handed back with every dependency
//! expanded into the referenced bag, recursively.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_core::artifact::now;
use tessera_core::{ArtifactState, SemVer};
use tracing::{debug, info};

use crate::bag::{DependencyEntry, PropertyBag};
use crate::error::RepositoryError;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Sort direction of one sort key
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

/// Filters, ordering and paging for [`ArtifactPersistence::list`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Equality filters on common fields; `tags` matches a contained tag
    pub filters: BTreeMap<String, String>,
    pub sort_keys: Vec<String>,
    /// Direction per sort key; missing entries sort descending
    pub sort_dirs: Vec<SortDir>,
    /// Id of the last artifact of the previous page
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn sort(mut self, key: impl Into<String>, dir: SortDir) -> Self {
        self.sort_keys.push(key.into());
        self.sort_dirs.push(dir);
        self
    }

    pub fn marker(mut self, id: impl Into<String>) -> Self {
        self.marker = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SortKey {
    Id,
    Name,
    Version,
    TypeName,
    TypeVersion,
    State,
    CreatedAt,
    UpdatedAt,
    PublishedAt,
}

impl FromStr for SortKey {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "id" => SortKey::Id,
            "name" => SortKey::Name,
            "version" => SortKey::Version,
            "type_name" => SortKey::TypeName,
            "type_version" => SortKey::TypeVersion,
            "state" => SortKey::State,
            "created_at" => SortKey::CreatedAt,
            "updated_at" => SortKey::UpdatedAt,
            "published_at" => SortKey::PublishedAt,
            other => return Err(RepositoryError::InvalidQuery(format!("cannot sort by '{other}'"))),
        })
    }
}

impl SortKey {
    fn compare(self, a: &PropertyBag, b: &PropertyBag) -> Ordering {
        match self {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Version => compare_versions(&a.version, &b.version),
            SortKey::TypeName => a.type_name.cmp(&b.type_name),
            SortKey::TypeVersion => compare_versions(&a.type_version, &b.type_version),
            SortKey::State => a.state.as_str().cmp(b.state.as_str()),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::PublishedAt => a.published_at.cmp(&b.published_at),
        }
    }
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (SemVer::parse(a), SemVer::parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn matches_filter(bag: &PropertyBag, field: &str, expected: &str) -> Result<bool, RepositoryError> {
    Ok(match field {
        "id" => bag.id == expected,
        "name" => bag.name == expected,
        "version" => bag.version == expected,
        "type_name" => bag.type_name == expected,
        "type_version" => bag.type_version == expected,
        "visibility" => bag.visibility.to_string() == expected,
        "state" => bag.state.as_str() == expected,
        "owner" => bag.owner.as_deref() == Some(expected),
        "tags" => bag.tags.contains(expected),
        other => return Err(RepositoryError::InvalidQuery(format!("cannot filter by '{other}'"))),
    })
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Storage of artifacts in their property-bag form
pub trait ArtifactPersistence: Send + Sync {
    /// Fetches one bag; a type filter that does not match reads as not found
    fn get(&self, id: &str, type_name: Option<&str>, type_version: Option<&str>) -> Result<PropertyBag, RepositoryError>;

    fn list(&self, query: &ListQuery) -> Result<Vec<PropertyBag>, RepositoryError>;

    fn add(&self, bag: PropertyBag) -> Result<PropertyBag, RepositoryError>;

    fn save(&self, bag: PropertyBag) -> Result<PropertyBag, RepositoryError>;

    /// Soft delete: state `deleted`, `deleted_at` set
    fn remove(&self, bag: &PropertyBag) -> Result<(), RepositoryError>;

    /// State `creating` to `active`, `published_at` set
    fn publish(&self, bag: &PropertyBag) -> Result<PropertyBag, RepositoryError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Property bags held in a map, keyed by artifact id
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    bags: RwLock<HashMap<String, PropertyBag>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.read().is_empty()
    }

    /// Replaces every dependency id with the referenced bag
    ///
    /// A bag already on the expansion path is emitted without its own
    /// dependencies, which ends the recursion on reference cycles.
    fn expand(
        bags: &HashMap<String, PropertyBag>,
        bag: &PropertyBag,
        path: &mut Vec<String>,
    ) -> Result<PropertyBag, RepositoryError> {
        let mut expanded = bag.clone();
        path.push(bag.id.clone());
        for entries in expanded.dependencies.values_mut() {
            let mut resolved = Vec::with_capacity(entries.len());
            for entry in entries.iter() {
                let id = entry.id();
                let target = bags
                    .get(id)
                    .ok_or_else(|| RepositoryError::corrupt(&bag.id, format!("dependency '{id}' is missing")))?;
                let nested = if path.iter().any(|p| p == id) {
                    let mut truncated = target.clone();
                    truncated.dependencies.clear();
                    truncated
                } else {
                    Self::expand(bags, target, path)?
                };
                resolved.push(DependencyEntry::Expanded(Box::new(nested)));
            }
            *entries = resolved;
        }
        path.pop();
        Ok(expanded)
    }

    fn fetch(bags: &HashMap<String, PropertyBag>, id: &str) -> Result<PropertyBag, RepositoryError> {
        let stored = bags.get(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        Self::expand(bags, stored, &mut Vec::new())
    }
}

impl ArtifactPersistence for InMemoryPersistence {
    fn get(&self, id: &str, type_name: Option<&str>, type_version: Option<&str>) -> Result<PropertyBag, RepositoryError> {
        let bags = self.bags.read();
        let stored = bags.get(id).ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let type_matches = type_name.is_none_or(|name| name == stored.type_name)
            && type_version.is_none_or(|version| version == stored.type_version);
        if !type_matches {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Self::expand(&bags, stored, &mut Vec::new())
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<PropertyBag>, RepositoryError> {
        let sort_keys = query
            .sort_keys
            .iter()
            .map(|key| key.parse::<SortKey>())
            .collect::<Result<Vec<_>, _>>()?;
        let order: Vec<(SortKey, SortDir)> = if sort_keys.is_empty() {
            vec![(SortKey::CreatedAt, SortDir::Desc)]
        } else {
            sort_keys
                .into_iter()
                .enumerate()
                .map(|(i, key)| (key, query.sort_dirs.get(i).copied().unwrap_or_default()))
                .collect()
        };

        let bags = self.bags.read();
        let include_deleted = query.filters.contains_key("state");
        let mut selected = Vec::new();
        for bag in bags.values() {
            if !include_deleted && bag.state == ArtifactState::Deleted {
                continue;
            }
            let mut keep = true;
            for (field, expected) in &query.filters {
                if !matches_filter(bag, field, expected)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                selected.push(bag);
            }
        }

        selected.sort_by(|a, b| {
            order
                .iter()
                .map(|(key, dir)| match dir {
                    SortDir::Asc => key.compare(a, b),
                    SortDir::Desc => key.compare(b, a),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.id.cmp(&b.id))
        });

        let start = match &query.marker {
            Some(marker) => {
                let position = selected
                    .iter()
                    .position(|bag| &bag.id == marker)
                    .ok_or_else(|| RepositoryError::InvalidQuery(format!("marker '{marker}' not found")))?;
                position + 1
            }
            None => 0,
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        selected
            .into_iter()
            .skip(start)
            .take(limit)
            .map(|bag| Self::expand(&bags, bag, &mut Vec::new()))
            .collect()
    }

    fn add(&self, bag: PropertyBag) -> Result<PropertyBag, RepositoryError> {
        let mut bags = self.bags.write();
        if bags.contains_key(&bag.id) {
            return Err(RepositoryError::Duplicate(bag.id));
        }
        let id = bag.id.clone();
        bags.insert(id.clone(), bag.collapsed());
        debug!(artifact_id = %id, "added artifact bag");
        Self::fetch(&bags, &id)
    }

    fn save(&self, bag: PropertyBag) -> Result<PropertyBag, RepositoryError> {
        let mut bags = self.bags.write();
        if !bags.contains_key(&bag.id) {
            return Err(RepositoryError::NotFound(bag.id));
        }
        let mut stored = bag.collapsed();
        stored.updated_at = now();
        let id = stored.id.clone();
        bags.insert(id.clone(), stored);
        debug!(artifact_id = %id, "saved artifact bag");
        Self::fetch(&bags, &id)
    }

    fn remove(&self, bag: &PropertyBag) -> Result<(), RepositoryError> {
        let mut bags = self.bags.write();
        let stored = bags
            .get_mut(&bag.id)
            .ok_or_else(|| RepositoryError::NotFound(bag.id.clone()))?;
        let removed_at = now();
        stored.state = ArtifactState::Deleted;
        stored.deleted_at = Some(removed_at);
        stored.updated_at = removed_at;
        info!(artifact_id = %bag.id, "artifact deleted");
        Ok(())
    }

    fn publish(&self, bag: &PropertyBag) -> Result<PropertyBag, RepositoryError> {
        let mut bags = self.bags.write();
        let mut stored = bag.collapsed();
        let current = bags
            .get(&bag.id)
            .ok_or_else(|| RepositoryError::NotFound(bag.id.clone()))?;
        if current.state != ArtifactState::Creating {
            return Err(RepositoryError::Forbidden(format!(
                "artifact '{}' is '{}', only 'creating' artifacts can be published",
                bag.id, current.state
            )));
        }
        let published_at = now();
        stored.state = ArtifactState::Active;
        stored.published_at = Some(published_at);
        stored.updated_at = published_at;
        bags.insert(bag.id.clone(), stored);
        info!(artifact_id = %bag.id, "artifact published");
        Self::fetch(&bags, &bag.id)
    }
}
