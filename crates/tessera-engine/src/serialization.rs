//! Serialization protocol
//!
//! Converts artifacts to and from the [`PropertyBag`] persistence shape, and
//! renders them for clients with a configurable dependency expansion depth.
//!
//! Property encoding:
//! - scalars: `{name: {type, value}}`
//! - lists: `{name: {type: "array", value: [{type, value}, ...]}}`; elements
//!   whose item definition has no DB type are skipped
//! - dicts: one entry per `name.key`, each with its own leaf type; declared
//!   keys of a composite dict without a value are written as `null`; a set
//!   dict without entries also gets a bare `{name: {type: "dict", value: {}}}`
//!
//! Dependencies are written as id lists and blobs always as lists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tessera_core::{
    Artifact, AttributeDefinition, AttributeKind, Blob, DbType, TypeRegistry, ValidationError, Value, format_datetime,
};
use tracing::trace;

use crate::bag::{BagValue, DependencyEntry, PropertyBag};
use crate::error::{EngineResult, RepositoryError};

// ---------------------------------------------------------------------------
// To the property bag
// ---------------------------------------------------------------------------

/// Builds the flat property bag of an artifact
pub fn serialize_for_db(artifact: &Artifact) -> PropertyBag {
    let registry = artifact.type_meta().registry();

    let mut properties = BTreeMap::new();
    for accessor in registry.properties() {
        encode_property(
            &mut properties,
            accessor.name().to_string(),
            accessor.definition(),
            artifact.peek(accessor.name()),
            false,
        );
    }

    let mut dependencies = BTreeMap::new();
    for accessor in registry.dependencies() {
        let ids: Vec<DependencyEntry> = match artifact.peek(accessor.name()) {
            Some(Value::Artifact(dep)) => vec![DependencyEntry::Id(dep.id.clone())],
            Some(Value::List(items)) => items
                .iter()
                .filter_map(Value::as_artifact)
                .map(|dep| DependencyEntry::Id(dep.id.clone()))
                .collect(),
            _ => continue,
        };
        dependencies.insert(accessor.name().to_string(), ids);
    }

    let mut blobs = BTreeMap::new();
    for accessor in registry.blobs() {
        let list: Vec<Blob> = match artifact.peek(accessor.name()) {
            Some(Value::Blob(blob)) => vec![blob.clone()],
            Some(Value::List(items)) => items.iter().filter_map(Value::as_blob).cloned().collect(),
            _ => continue,
        };
        blobs.insert(accessor.name().to_string(), list);
    }

    trace!(artifact_id = %artifact.id, properties = properties.len(), "serialized artifact for storage");

    PropertyBag {
        id: artifact.id.clone(),
        name: artifact.name.clone(),
        version: artifact.version.clone(),
        type_name: artifact.type_name().to_string(),
        type_version: artifact.type_version().to_string(),
        visibility: artifact.visibility,
        state: artifact.state,
        owner: artifact.owner.clone(),
        created_at: artifact.created_at,
        updated_at: artifact.updated_at,
        published_at: artifact.published_at,
        deleted_at: artifact.deleted_at,
        tags: artifact.tags.clone(),
        description: artifact.description.clone(),
        properties,
        blobs,
        dependencies,
    }
}

fn encode_property(
    out: &mut BTreeMap<String, BagValue>,
    key: String,
    definition: &AttributeDefinition,
    value: Option<&Value>,
    declared: bool,
) {
    if let AttributeKind::Dict(_) = definition.kind() {
        let entries = value.and_then(Value::as_dict);
        if entries.is_some_and(|m| m.is_empty()) {
            out.insert(key.clone(), BagValue::new(DbType::Dict, json!({})));
        }
        if let Some(declared_keys) = definition.declared_keys() {
            for (name, sub) in declared_keys {
                encode_property(out, format!("{key}.{name}"), sub, entries.and_then(|m| m.get(name)), true);
            }
        } else if let Some(entries) = entries {
            for (name, item) in entries {
                if let Some(sub) = definition.value_definition(name) {
                    encode_property(out, format!("{key}.{name}"), sub, Some(item), false);
                }
            }
        }
        return;
    }

    let Some(db_type) = definition.db_type() else {
        return;
    };
    match value {
        Some(value) => {
            out.insert(key, BagValue::new(db_type, encode_value(definition, value)));
        }
        None if declared => {
            out.insert(key, BagValue::null(db_type));
        }
        None => {}
    }
}

fn encode_value(definition: &AttributeDefinition, value: &Value) -> JsonValue {
    match value {
        Value::List(items) => JsonValue::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let item_def = definition.item_definition(i)?;
                    let db_type = item_def.db_type()?;
                    Some(json!({"type": db_type, "value": encode_value(item_def, item)}))
                })
                .collect(),
        ),
        other => other.to_json(),
    }
}

// ---------------------------------------------------------------------------
// From the property bag
// ---------------------------------------------------------------------------

/// Reconstructs an artifact from its bag
///
/// The concrete type is looked up by `(type_name, type_version)`; dependencies
/// must arrive expanded and are reconstructed recursively.
pub fn deserialize_from_db(bag: &PropertyBag, registry: &dyn TypeRegistry) -> EngineResult<Artifact> {
    let meta = registry.get_class_by_typename(&bag.type_name, Some(bag.type_version.as_str()))?;
    let mut values: Vec<(String, Option<Value>)> = Vec::new();

    let mut grouped: BTreeMap<&str, (Option<&BagValue>, Vec<(&str, &BagValue)>)> = BTreeMap::new();
    for (key, entry) in &bag.properties {
        match key.split_once('.') {
            Some((attribute, rest)) => grouped.entry(attribute).or_default().1.push((rest, entry)),
            None => grouped.entry(key.as_str()).or_default().0 = Some(entry),
        }
    }
    for (attribute, (bare, dotted)) in grouped {
        let accessor = meta
            .accessor(attribute)
            .ok_or_else(|| ValidationError::unknown_property(attribute))?;
        let json = match bare {
            Some(entry) if entry.db_type != DbType::Dict && dotted.is_empty() => plain_json(entry.db_type, &entry.value),
            _ => assemble_dict(accessor.definition(), is_dict_marker(bare), dotted),
        };
        values.push((
            attribute.to_string(),
            accessor.definition().value_from_json_as(attribute, &json)?,
        ));
    }

    for (name, blobs) in &bag.blobs {
        let accessor = meta
            .accessor(name)
            .ok_or_else(|| ValidationError::unknown_property(name))?;
        let mut items = blobs.iter().cloned().map(Value::Blob);
        let value = if accessor.definition().is_list() {
            Some(Value::List(items.collect()))
        } else {
            items.next()
        };
        values.push((name.clone(), value));
    }

    for (name, entries) in &bag.dependencies {
        let accessor = meta
            .accessor(name)
            .ok_or_else(|| ValidationError::unknown_property(name))?;
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                DependencyEntry::Expanded(inner) => {
                    resolved.push(Value::Artifact(Box::new(deserialize_from_db(inner, registry)?)));
                }
                DependencyEntry::Id(id) => {
                    return Err(RepositoryError::corrupt(&bag.id, format!("dependency '{id}' was not expanded")).into());
                }
            }
        }
        let value = if accessor.definition().is_list() {
            Some(Value::List(resolved))
        } else {
            resolved.into_iter().next()
        };
        values.push((name.clone(), value));
    }

    let mut artifact = Artifact::from_properties(meta, bag.id.clone(), values)?;
    artifact.name = bag.name.clone();
    artifact.version = bag.version.clone();
    artifact.visibility = bag.visibility;
    artifact.state = bag.state;
    artifact.owner = bag.owner.clone();
    artifact.created_at = bag.created_at;
    artifact.updated_at = bag.updated_at;
    artifact.published_at = bag.published_at;
    artifact.deleted_at = bag.deleted_at;
    artifact.tags = bag.tags.clone();
    artifact.description = bag.description.clone();
    Ok(artifact)
}

/// Drops the `{type, value}` wrapping of list elements
fn plain_json(db_type: DbType, value: &JsonValue) -> JsonValue {
    match (db_type, value) {
        (DbType::Array, JsonValue::Array(items)) => JsonValue::Array(items.iter().map(strip_typed).collect()),
        _ => value.clone(),
    }
}

fn strip_typed(item: &JsonValue) -> JsonValue {
    let value = item.get("value").unwrap_or(&JsonValue::Null);
    match item.get("type").and_then(|t| DbType::deserialize(t).ok()) {
        Some(db_type) => plain_json(db_type, value),
        None => value.clone(),
    }
}

fn is_dict_marker(entry: Option<&BagValue>) -> bool {
    entry.is_some_and(|e| e.db_type == DbType::Dict)
}

/// Regroups `key[.subkey]` entries of one dict attribute into a JSON object
///
/// Yields `null` when no entry carries a value and the dict has no marker.
fn assemble_dict(definition: &AttributeDefinition, present: bool, entries: Vec<(&str, &BagValue)>) -> JsonValue {
    let mut object = JsonMap::new();
    let mut nested: BTreeMap<String, (bool, Vec<(&str, &BagValue)>)> = BTreeMap::new();
    for (rest, entry) in entries {
        match split_dict_key(definition, rest) {
            (key, Some(deeper)) => nested.entry(key).or_default().1.push((deeper, entry)),
            (key, None) if entry.db_type == DbType::Dict => nested.entry(key).or_default().0 = true,
            (key, None) if !entry.is_null() => {
                object.insert(key, plain_json(entry.db_type, &entry.value));
            }
            _ => {}
        }
    }
    for (key, (sub_present, sub_entries)) in nested {
        let Some(sub) = definition.value_definition(&key) else {
            continue;
        };
        let json = assemble_dict(sub, sub_present, sub_entries);
        if !json.is_null() {
            object.insert(key, json);
        }
    }
    if object.is_empty() && !present {
        JsonValue::Null
    } else {
        JsonValue::Object(object)
    }
}

fn split_dict_key<'a>(definition: &AttributeDefinition, rest: &'a str) -> (String, Option<&'a str>) {
    if let Some(mut declared) = definition.declared_keys() {
        return match declared.find(|(key, _)| rest.strip_prefix(key.as_str()).is_some_and(|r| r.starts_with('.'))) {
            Some((key, _)) => (key.clone(), Some(&rest[key.len() + 1..])),
            None => (rest.to_string(), None),
        };
    }
    let nested_dicts = definition
        .value_definition(rest)
        .is_some_and(AttributeDefinition::is_dict);
    match rest.split_once('.') {
        Some((key, deeper)) if nested_dicts => (key.to_string(), Some(deeper)),
        _ => (rest.to_string(), None),
    }
}

// ---------------------------------------------------------------------------
// Client rendering
// ---------------------------------------------------------------------------

/// How deeply dependencies are expanded for clients
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowLevel {
    /// Common fields only; dependencies as ids
    None,
    /// Adds properties; dependencies as ids
    #[default]
    Basic,
    /// Dependencies rendered at `None`
    Direct,
    /// Dependencies rendered at `Direct`
    Transitive,
}

impl ShowLevel {
    /// Level dependencies are rendered at, if they are expanded at all
    pub fn nested(self) -> Option<ShowLevel> {
        match self {
            ShowLevel::Direct => Some(ShowLevel::None),
            ShowLevel::Transitive => Some(ShowLevel::Direct),
            ShowLevel::None | ShowLevel::Basic => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShowLevel::None => "none",
            ShowLevel::Basic => "basic",
            ShowLevel::Direct => "direct",
            ShowLevel::Transitive => "transitive",
        }
    }
}

impl fmt::Display for ShowLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShowLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ShowLevel::None),
            "basic" => Ok(ShowLevel::Basic),
            "direct" => Ok(ShowLevel::Direct),
            "transitive" => Ok(ShowLevel::Transitive),
            other => Err(ValidationError::new("show_level", "Unknown show level").with_value(json!(other))),
        }
    }
}

/// Renders an artifact for a client
///
/// Blob attributes are always rendered, with a download link under
/// `url_prefix`.
pub fn serialize_for_client(artifact: &Artifact, level: ShowLevel, url_prefix: &str) -> JsonValue {
    let mut out = JsonMap::new();
    out.insert("id".to_string(), json!(artifact.id));
    out.insert("name".to_string(), json!(artifact.name));
    out.insert("version".to_string(), json!(artifact.version));
    out.insert("type_name".to_string(), json!(artifact.type_name()));
    out.insert("type_version".to_string(), json!(artifact.type_version()));
    out.insert("visibility".to_string(), json!(artifact.visibility.to_string()));
    out.insert("state".to_string(), json!(artifact.state.as_str()));
    out.insert("owner".to_string(), json!(artifact.owner));
    out.insert("created_at".to_string(), json!(format_datetime(&artifact.created_at)));
    out.insert("updated_at".to_string(), json!(format_datetime(&artifact.updated_at)));
    out.insert("published_at".to_string(), json!(artifact.published_at.as_ref().map(format_datetime)));
    out.insert("deleted_at".to_string(), json!(artifact.deleted_at.as_ref().map(format_datetime)));
    out.insert("tags".to_string(), json!(artifact.tags));
    out.insert("description".to_string(), json!(artifact.description));

    let registry = artifact.type_meta().registry();
    if level >= ShowLevel::Basic {
        for accessor in registry.properties() {
            let value = artifact.peek(accessor.name()).map_or(JsonValue::Null, Value::to_json);
            out.insert(accessor.name().to_string(), value);
        }
    }

    for accessor in registry.dependencies() {
        let rendered = match artifact.peek(accessor.name()) {
            Some(Value::Artifact(dep)) => render_dependency(dep, level, url_prefix),
            Some(Value::List(items)) => JsonValue::Array(
                items
                    .iter()
                    .filter_map(Value::as_artifact)
                    .map(|dep| render_dependency(dep, level, url_prefix))
                    .collect(),
            ),
            _ => JsonValue::Null,
        };
        out.insert(accessor.name().to_string(), rendered);
    }

    for accessor in registry.blobs() {
        let name = accessor.name();
        let rendered = match artifact.peek(name) {
            Some(Value::Blob(blob)) => render_blob(blob, download_link(artifact, name, None, url_prefix)),
            Some(Value::List(items)) => JsonValue::Array(
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| {
                        let blob = item.as_blob()?;
                        Some(render_blob(blob, download_link(artifact, name, Some(i), url_prefix)))
                    })
                    .collect(),
            ),
            _ => JsonValue::Null,
        };
        out.insert(name.to_string(), rendered);
    }

    JsonValue::Object(out)
}

fn render_dependency(dep: &Artifact, level: ShowLevel, url_prefix: &str) -> JsonValue {
    match level.nested() {
        Some(nested) => serialize_for_client(dep, nested, url_prefix),
        None => json!(dep.id),
    }
}

fn render_blob(blob: &Blob, link: String) -> JsonValue {
    let mut rendered = blob.to_dict();
    rendered["download_link"] = json!(link);
    rendered
}

/// `<prefix>/<endpoint>/v<type_version>/<id>/<attribute>/download[/<index>]`
pub fn download_link(artifact: &Artifact, attribute: &str, index: Option<usize>, url_prefix: &str) -> String {
    let mut link = format!(
        "{}/{}/v{}/{}/{}/download",
        url_prefix.trim_end_matches('/'),
        artifact.type_meta().endpoint,
        artifact.type_version(),
        artifact.id,
        attribute
    );
    if let Some(index) = index {
        link.push_str(&format!("/{index}"));
    }
    link
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_typed_nested_arrays() {
        let typed = json!({
            "type": "array",
            "value": [{"type": "int", "value": 1}, {"type": "int", "value": 2}]
        });
        assert_eq!(strip_typed(&typed), json!([1, 2]));
        assert_eq!(strip_typed(&json!({"type": "string", "value": "x"})), json!("x"));
    }

    #[test]
    fn test_show_level_order_and_nesting() {
        assert!(ShowLevel::None < ShowLevel::Basic);
        assert!(ShowLevel::Direct < ShowLevel::Transitive);
        assert_eq!(ShowLevel::Transitive.nested(), Some(ShowLevel::Direct));
        assert_eq!(ShowLevel::Direct.nested(), Some(ShowLevel::None));
        assert_eq!(ShowLevel::Basic.nested(), None);
        assert_eq!("direct".parse::<ShowLevel>().unwrap(), ShowLevel::Direct);
        assert!("deep".parse::<ShowLevel>().is_err());
    }

    #[test]
    fn test_assemble_dict_all_null_is_null() {
        let def = AttributeDefinition::composite([("foo", AttributeDefinition::string())]);
        let null = BagValue::null(DbType::String);
        assert_eq!(assemble_dict(&def, false, vec![("foo", &null)]), JsonValue::Null);
        assert_eq!(assemble_dict(&def, true, vec![("foo", &null)]), json!({}));

        let set = BagValue::new(DbType::String, json!("x"));
        assert_eq!(assemble_dict(&def, false, vec![("foo", &set)]), json!({"foo": "x"}));
    }

    #[test]
    fn test_assemble_dict_nested_marker() {
        let def = AttributeDefinition::dict(AttributeDefinition::dict(AttributeDefinition::string()));
        let marker = BagValue::new(DbType::Dict, json!({}));
        assert_eq!(assemble_dict(&def, false, vec![("inner", &marker)]), json!({"inner": {}}));
    }

    #[test]
    fn test_split_dict_key_prefers_declared_keys() {
        let def = AttributeDefinition::composite([
            ("a.b", AttributeDefinition::string()),
            ("inner", AttributeDefinition::dict(AttributeDefinition::integer())),
        ]);
        assert_eq!(split_dict_key(&def, "a.b"), ("a.b".to_string(), None));
        assert_eq!(split_dict_key(&def, "inner.x"), ("inner".to_string(), Some("x")));
    }
}
