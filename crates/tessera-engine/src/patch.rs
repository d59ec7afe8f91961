//! JSON-Patch style updates of artifact attributes
//!
//! A patch is an ordered list of [`PatchOperation`]s. Paths are
//! slash-delimited: the first segment names an attribute, later segments
//! walk into the list or dict it holds. `~1` stands for `/` and `~0` for
//! `~` inside a segment.
//!
//! Each operation rebuilds the attribute's value and assigns it whole
//! through the proxy chain, so validation, relation resolution and blob
//! cleanup apply as for any other write. Operations of a batch are applied
//! one by one; a failure leaves the earlier ones in place.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tessera_core::{AttributeDefinition, AttributeKind, PathError, Section, ValidationError, Value};
use tracing::debug;

use crate::error::EngineResult;
use crate::proxy::{ArtifactProxy, AttributeInput};

/// Operation kinds understood by the patch engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

impl PatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Replace => "replace",
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{op, path, value?}` instruction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: JsonValue) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: JsonValue) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Splits a patch path into unescaped segments
pub fn parse_path(path: &str) -> Result<Vec<String>, PathError> {
    let Some(body) = path.strip_prefix('/') else {
        return Err(PathError::new(path, "Path must start with '/'"));
    };
    if path.ends_with('/') {
        return Err(PathError::new(path, "Path must not end with '/'"));
    }
    if path.contains("//") {
        return Err(PathError::new(path, "Path must not contain empty segments"));
    }
    body.split('/').map(|segment| unescape(path, segment)).collect()
}

fn unescape(path: &str, segment: &str) -> Result<String, PathError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(PathError::new(path, "Invalid escape sequence, '~' must be followed by '0' or '1'")),
        }
    }
    Ok(out)
}

/// Position addressed by a list segment
///
/// `-` is the end of the list: the append position for `add`, the last
/// element otherwise. It never resolves on an empty list.
fn resolve_index(path: &str, segment: &str, len: usize, appending: bool) -> Result<usize, PathError> {
    let no_element = || PathError::new(path, format!("Array has no element at position {segment}"));
    let index = if segment == "-" {
        match (len, appending) {
            (0, _) => return Err(no_element()),
            (len, true) => len,
            (len, false) => len - 1,
        }
    } else {
        if !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PathError::new(path, format!("'{segment}' is not an array index")));
        }
        segment.parse::<usize>().map_err(|_| no_element())?
    };
    let limit = if appending { len } else { len.saturating_sub(1) };
    if index > limit || (!appending && len == 0) {
        return Err(no_element());
    }
    Ok(index)
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

struct Target<'a> {
    path: &'a str,
    attribute: &'a str,
    op: PatchOp,
    value: Option<&'a JsonValue>,
}

impl Target<'_> {
    fn value(&self) -> Result<&JsonValue, PathError> {
        self.value
            .ok_or_else(|| PathError::new(self.path, format!("Operation '{}' requires a value", self.op)))
    }
}

/// Applies a single operation to an artifact behind a proxy chain
pub fn apply_operation<P: ArtifactProxy + ?Sized>(target: &mut P, operation: &PatchOperation) -> EngineResult<()> {
    let segments = parse_path(&operation.path)?;
    let Some((name, rest)) = segments.split_first() else {
        return Err(PathError::new(&operation.path, "Path must address an attribute").into());
    };
    let accessor = target
        .base()
        .type_meta()
        .accessor(name)
        .cloned()
        .ok_or_else(|| PathError::new(&operation.path, format!("No such attribute '{name}'")))?;
    let ctx = Target {
        path: &operation.path,
        attribute: name,
        op: operation.op,
        value: operation.value.as_ref(),
    };
    debug!(
        artifact_id = %target.base().id,
        op = %operation.op,
        path = %operation.path,
        "applying patch operation"
    );

    let definition = accessor.definition();
    match accessor.section() {
        Section::Property => {
            let current = target.base().peek(name).cloned();
            let updated = apply_to_value(&ctx, definition, current, rest)?;
            target.set_attribute(name, AttributeInput::Value(updated))
        }
        Section::Dependency => {
            let input = apply_to_dependency(&ctx, definition, target.base().peek(name), rest)?;
            target.set_attribute(name, input)
        }
        Section::Blob => {
            let updated = apply_to_blob(&ctx, definition, target.base().peek(name), rest)?;
            target.set_attribute(name, AttributeInput::Value(updated))
        }
    }
}

/// Applies `ops` in order, stopping at the first failure
pub fn apply_patch<P: ArtifactProxy + ?Sized>(target: &mut P, ops: &[PatchOperation]) -> EngineResult<()> {
    for operation in ops {
        apply_operation(target, operation)?;
    }
    Ok(())
}

fn apply_to_value(
    ctx: &Target<'_>,
    definition: &AttributeDefinition,
    current: Option<Value>,
    rest: &[String],
) -> EngineResult<Option<Value>> {
    let Some((segment, deeper)) = rest.split_first() else {
        return match ctx.op {
            PatchOp::Remove => Ok(None),
            PatchOp::Add | PatchOp::Replace => Ok(definition.value_from_json_as(ctx.attribute, ctx.value()?)?),
        };
    };

    let container = current.or_else(|| definition.empty_container());
    match (definition.kind(), container) {
        (AttributeKind::List(_), Some(Value::List(mut items))) => {
            let appending = ctx.op == PatchOp::Add && deeper.is_empty();
            let index = resolve_index(ctx.path, segment, items.len(), appending)?;
            let item_definition = definition
                .item_definition(index)
                .ok_or_else(|| PathError::new(ctx.path, format!("Array has no element at position {segment}")))?;

            if !deeper.is_empty() {
                let child = items[index].clone();
                match apply_to_value(ctx, item_definition, Some(child), deeper)? {
                    Some(updated) => items[index] = updated,
                    None => {
                        items.remove(index);
                    }
                }
                return Ok(Some(Value::List(items)));
            }

            let item_name = format!("{}[{index}]", ctx.attribute);
            let parse = |json: &JsonValue| -> Result<Value, ValidationError> {
                item_definition
                    .value_from_json_as(&item_name, json)?
                    .ok_or_else(|| ValidationError::new(&item_name, "List items cannot be null"))
            };
            match ctx.op {
                PatchOp::Add => items.insert(index, parse(ctx.value()?)?),
                PatchOp::Replace => items[index] = parse(ctx.value()?)?,
                PatchOp::Remove => {
                    items.remove(index);
                }
            }
            Ok(Some(Value::List(items)))
        }
        (AttributeKind::Dict(_), Some(Value::Dict(mut entries))) => {
            let exists = entries.contains_key(segment.as_str());
            let missing = || PathError::new(ctx.path, format!("No such key '{segment}' in a dict"));
            if !exists && (ctx.op != PatchOp::Add || !deeper.is_empty()) {
                return Err(missing().into());
            }
            let value_definition = definition.value_definition(segment).ok_or_else(|| {
                ValidationError::new(ctx.attribute, format!("Key '{segment}' is not allowed"))
            })?;

            let updated = if deeper.is_empty() {
                match ctx.op {
                    PatchOp::Remove => None,
                    PatchOp::Add | PatchOp::Replace => {
                        let key_name = format!("{}.{segment}", ctx.attribute);
                        value_definition.value_from_json_as(&key_name, ctx.value()?)?
                    }
                }
            } else {
                let child = entries.get(segment.as_str()).cloned();
                apply_to_value(ctx, value_definition, child, deeper)?
            };
            set_entry(&mut entries, segment, updated);
            Ok(Some(Value::Dict(entries)))
        }
        _ => Err(PathError::new(
            ctx.path,
            format!("Attribute '{}' has no element '{segment}'", ctx.attribute),
        )
        .into()),
    }
}

fn set_entry(entries: &mut BTreeMap<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            entries.insert(key.to_string(), value);
        }
        None => {
            entries.remove(key);
        }
    }
}

fn reference_id(ctx: &Target<'_>, json: &JsonValue) -> Result<String, ValidationError> {
    json.as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(ctx.attribute, "Value must be an artifact id").with_value(json.clone()))
}

fn apply_to_dependency(
    ctx: &Target<'_>,
    definition: &AttributeDefinition,
    current: Option<&Value>,
    rest: &[String],
) -> EngineResult<AttributeInput> {
    let Some((segment, deeper)) = rest.split_first() else {
        let json = match ctx.op {
            PatchOp::Remove => return Ok(AttributeInput::Value(None)),
            PatchOp::Add | PatchOp::Replace => ctx.value()?,
        };
        if json.is_null() {
            return Ok(AttributeInput::Value(None));
        }
        if !definition.is_list() {
            return Ok(AttributeInput::Reference(reference_id(ctx, json)?));
        }
        let items = json.as_array().ok_or_else(|| {
            ValidationError::new(ctx.attribute, "Value must be a list of artifact ids").with_value(json.clone())
        })?;
        let ids = items
            .iter()
            .map(|item| reference_id(ctx, item))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(AttributeInput::References(ids));
    };

    if !definition.is_list() || !deeper.is_empty() {
        return Err(PathError::new(
            ctx.path,
            format!("Attribute '{}' has no element '{segment}'", ctx.attribute),
        )
        .into());
    }
    let mut ids: Vec<String> = match current {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(Value::as_artifact)
            .map(|artifact| artifact.id.clone())
            .collect(),
        _ => Vec::new(),
    };
    let index = resolve_index(ctx.path, segment, ids.len(), ctx.op == PatchOp::Add)?;
    match ctx.op {
        PatchOp::Add => ids.insert(index, reference_id(ctx, ctx.value()?)?),
        PatchOp::Replace => ids[index] = reference_id(ctx, ctx.value()?)?,
        PatchOp::Remove => {
            ids.remove(index);
        }
    }
    Ok(AttributeInput::References(ids))
}

fn apply_to_blob(
    ctx: &Target<'_>,
    definition: &AttributeDefinition,
    current: Option<&Value>,
    rest: &[String],
) -> EngineResult<Option<Value>> {
    if ctx.op != PatchOp::Remove {
        return Err(ValidationError::new(ctx.attribute, "Blob data cannot be set through a patch").into());
    }
    match rest {
        [] => Ok(None),
        [segment] if definition.is_list() => {
            let mut items = match current {
                Some(Value::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            let index = resolve_index(ctx.path, segment, items.len(), false)?;
            items.remove(index);
            Ok(Some(Value::List(items)))
        }
        [segment, ..] => Err(PathError::new(
            ctx.path,
            format!("Attribute '{}' has no element '{segment}'", ctx.attribute),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tessera_core::{Artifact, TypeDescriptor};

    use super::*;
    use crate::error::EngineError;

    fn artifact() -> Artifact {
        let meta = TypeDescriptor::new("Sample", "1.0.0")
            .attribute("prop_list", AttributeDefinition::list(AttributeDefinition::integer()))
            .attribute("title", AttributeDefinition::string())
            .attribute("labels", AttributeDefinition::dict(AttributeDefinition::string()))
            .register()
            .unwrap();
        Artifact::create(meta, "sample", "1.0.0").unwrap()
    }

    fn path_error(result: EngineResult<()>) -> PathError {
        match result {
            Err(EngineError::Path(err)) => err,
            other => panic!("expected a path error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_path_escapes() {
        assert_eq!(parse_path("/a~1b/c~0d").unwrap(), vec!["a/b", "c~d"]);
        assert_eq!(parse_path("/~01").unwrap(), vec!["~1"]);
        assert_eq!(parse_path("/attr").unwrap(), vec!["attr"]);
    }

    #[test]
    fn test_parse_path_rejects_malformed() {
        for path in ["attr", "/attr/", "/a//b", "/a~", "/a~2", "/"] {
            assert!(parse_path(path).is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index("/l/-", "-", 3, true).unwrap(), 3);
        assert_eq!(resolve_index("/l/-", "-", 3, false).unwrap(), 2);
        assert_eq!(resolve_index("/l/0", "0", 0, true).unwrap(), 0);
        assert!(resolve_index("/l/-", "-", 0, true).is_err());
        assert!(resolve_index("/l/0", "0", 0, false).is_err());
        assert!(resolve_index("/l/4", "4", 3, true).is_err());
        assert!(resolve_index("/l/x", "x", 3, true).is_err());
    }

    #[test]
    fn test_scalar_replace_and_remove() {
        let mut a = artifact();
        apply_operation(&mut a, &PatchOperation::replace("/title", json!("hello"))).unwrap();
        assert_eq!(a.peek("title"), Some(&Value::from("hello")));

        apply_operation(&mut a, &PatchOperation::remove("/title")).unwrap();
        assert_eq!(a.peek("title"), None);
    }

    #[test]
    fn test_list_materialized_from_schema() {
        let mut a = artifact();
        apply_operation(&mut a, &PatchOperation::add("/prop_list/0", json!(4))).unwrap();
        assert_eq!(a.peek("prop_list"), Some(&Value::List(vec![Value::Integer(4)])));
    }

    #[test]
    fn test_dict_keys() {
        let mut a = artifact();
        apply_operation(&mut a, &PatchOperation::add("/labels/a~1b", json!("x"))).unwrap();
        let labels = a.peek("labels").and_then(Value::as_dict).unwrap();
        assert_eq!(labels.get("a/b"), Some(&Value::from("x")));

        let err = path_error(apply_operation(&mut a, &PatchOperation::replace("/labels/zz", json!("y"))));
        assert_eq!(err.message, "No such key 'zz' in a dict");

        apply_operation(&mut a, &PatchOperation::remove("/labels/a~1b")).unwrap();
        assert_eq!(a.peek("labels").and_then(Value::as_dict).map(BTreeMap::len), Some(0));
    }

    #[test]
    fn test_unknown_attribute_and_missing_value() {
        let mut a = artifact();
        let err = path_error(apply_operation(&mut a, &PatchOperation::remove("/nope")));
        assert!(err.message.contains("No such attribute"));

        let op = PatchOperation {
            op: PatchOp::Add,
            path: "/title".to_string(),
            value: None,
        };
        let err = path_error(apply_operation(&mut a, &op));
        assert_eq!(err.message, "Operation 'add' requires a value");
    }

    #[test]
    fn test_scalar_has_no_elements() {
        let mut a = artifact();
        let err = path_error(apply_operation(&mut a, &PatchOperation::add("/title/0", json!("x"))));
        assert!(err.message.contains("has no element"));
    }

    #[test]
    fn test_operation_wire_format() {
        let op: PatchOperation = serde_json::from_value(json!({"op": "remove", "path": "/title"})).unwrap();
        assert_eq!(op, PatchOperation::remove("/title"));
        assert_eq!(serde_json::to_value(&op).unwrap(), json!({"op": "remove", "path": "/title"}));
    }
}
