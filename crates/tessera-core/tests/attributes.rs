//! Attribute definition behaviour across kinds

use proptest::prelude::*;
use tessera_core::{AttributeDefinition, SchemaDefinitionError, TypeDescriptor, Value};

// ============================================================
// Helpers
// ============================================================

fn every_kind() -> Vec<AttributeDefinition> {
    vec![
        AttributeDefinition::string(),
        AttributeDefinition::text(),
        AttributeDefinition::integer(),
        AttributeDefinition::numeric(),
        AttributeDefinition::boolean(),
        AttributeDefinition::datetime(),
        AttributeDefinition::list(AttributeDefinition::integer()),
        AttributeDefinition::tuple(vec![AttributeDefinition::string(), AttributeDefinition::boolean()]),
        AttributeDefinition::dict(AttributeDefinition::string()),
        AttributeDefinition::composite([("foo", AttributeDefinition::string())]),
        AttributeDefinition::relation(),
        AttributeDefinition::relation_list(),
        AttributeDefinition::blob(),
        AttributeDefinition::blob_list(),
    ]
}

// ============================================================
// Required / None
// ============================================================

#[test]
fn test_validate_none_iff_not_required() {
    for def in every_kind() {
        assert!(def.validate(None).is_ok(), "{def:?}");
        let required = def.required();
        let err = required.validate(None).unwrap_err();
        assert_eq!(err.message, "Value is required");
    }
}

proptest! {
    #[test]
    fn prop_string_max_length_boundary(max in 0usize..32, s in "[a-z]{0,40}") {
        let def = AttributeDefinition::string().max_length(max);
        let ok = def.validate(Some(&Value::from(s.as_str()))).is_ok();
        prop_assert_eq!(ok, s.chars().count() <= max);
    }

    #[test]
    fn prop_integer_range(min in -50i32..50, span in 0i32..50, n in -200i64..200) {
        let max = min + span;
        let def = AttributeDefinition::integer().min_value(min).max_value(max);
        let ok = def.validate(Some(&Value::Integer(n))).is_ok();
        prop_assert_eq!(ok, n >= i64::from(min) && n <= i64::from(max));
    }
}

// ============================================================
// Facets
// ============================================================

#[test]
fn test_pattern_and_allowed_values() {
    let def = AttributeDefinition::string().pattern("^[a-z]+$");
    assert!(def.validate(Some(&Value::from("abc"))).is_ok());
    assert!(def.validate(Some(&Value::from("ABC"))).is_err());

    let def = AttributeDefinition::integer().allowed_values([1, 2, 3]);
    assert!(def.validate(Some(&Value::from(2))).is_ok());
    let err = def.validate(Some(&Value::from(4))).unwrap_err();
    assert_eq!(err.value, Some(serde_json::json!(4)));
}

#[test]
fn test_custom_validator_message() {
    let def = AttributeDefinition::integer().validator("even", "Value must be even", |v| {
        v.as_i64().is_some_and(|i| i % 2 == 0)
    });
    assert_eq!(
        def.validate(Some(&Value::from(3))).unwrap_err().message,
        "Value must be even"
    );
}

#[test]
fn test_unique_list() {
    let def = AttributeDefinition::list(AttributeDefinition::string()).unique().max_size(3);
    assert!(def.validate(Some(&Value::from(vec!["a", "b", "c"]))).is_ok());
    assert!(def.validate(Some(&Value::from(vec!["a", "a"]))).is_err());
    assert!(def.validate(Some(&Value::from(vec!["a", "b", "c", "d"]))).is_err());
}

#[test]
fn test_dict_key_count() {
    let def = AttributeDefinition::dict(AttributeDefinition::integer()).min_keys(1).max_keys(2);
    assert!(def.validate(Some(&Value::Dict(Default::default()))).is_err());
}

#[test]
fn test_nested_errors_name_the_element() {
    let def = AttributeDefinition::composite([(
        "bar_list",
        AttributeDefinition::list(AttributeDefinition::integer().max_value(5)),
    )]);
    let value = def
        .value_from_json_as("dict_prop", &serde_json::json!({"bar_list": [1, 9]}))
        .unwrap();
    let err = def.validate_as("dict_prop", value.as_ref()).unwrap_err();
    assert_eq!(err.attribute, "dict_prop.bar_list[1]");
}

#[test]
fn test_blob_bounds() {
    use tessera_core::{Blob, BlobLocation};

    let def = AttributeDefinition::blob().max_blob_size(10).min_locations(1);
    let blob = Blob::new("a.b", 5, None);
    assert!(def.validate(Some(&Value::Blob(blob.clone()))).is_err());
    let blob = blob.with_location(BlobLocation::active("memory://a.b"));
    assert!(def.validate(Some(&Value::Blob(blob))).is_ok());
    let big = Blob::new("a.b", 11, None).with_location(BlobLocation::active("memory://a.b"));
    assert!(def.validate(Some(&Value::Blob(big))).is_err());
}

// ============================================================
// Declaration-time failures
// ============================================================

#[test]
fn test_declaration_errors_surface_at_register() {
    let err = TypeDescriptor::new("Bad", "1.0.0")
        .attribute("s", AttributeDefinition::string().max_length(2).default("abc"))
        .register()
        .unwrap_err();
    assert!(matches!(err, SchemaDefinitionError::InvalidDefault { .. }));

    let err = TypeDescriptor::new("Bad", "1.0.0")
        .attribute("n", AttributeDefinition::integer().max_value(3).allowed_values([1, 5]))
        .register()
        .unwrap_err();
    assert!(matches!(err, SchemaDefinitionError::InvalidAllowedValue { .. }));

    let err = TypeDescriptor::new("Bad", "1.0.0")
        .attribute("l", AttributeDefinition::list(AttributeDefinition::string().min_length(4).max_length(2)))
        .register()
        .unwrap_err();
    assert!(matches!(err, SchemaDefinitionError::ConflictingFacets { ref attribute, .. } if attribute == "l[]"));

    let err = TypeDescriptor::new("Bad", "1.0.0")
        .attribute("p", AttributeDefinition::string().pattern("(unclosed"))
        .register()
        .unwrap_err();
    assert!(matches!(err, SchemaDefinitionError::ConflictingFacets { .. }));
}
