//! Named validator slots
//!
//! Every constraint on an attribute is a [`Validator`]: a rule plus the
//! message reported when the rule is violated. Validators live in named
//! slots so re-configuring a facet replaces the previous rule in place.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Value as JsonValue, json};

use crate::value::Value;

/// Caller-supplied predicate; returns `true` when the value is acceptable
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// The value shape an attribute kind accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    String,
    Integer,
    Numeric,
    Boolean,
    DateTime,
    List,
    Dict,
    Artifact,
    Blob,
}

impl Shape {
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Shape::String, Value::String(_) | Value::Text(_))
                | (Shape::Integer, Value::Integer(_))
                | (Shape::Numeric, Value::Numeric(_) | Value::Integer(_))
                | (Shape::Boolean, Value::Boolean(_))
                | (Shape::DateTime, Value::DateTime(_))
                | (Shape::List, Value::List(_))
                | (Shape::Dict, Value::Dict(_))
                | (Shape::Artifact, Value::Artifact(_))
                | (Shape::Blob, Value::Blob(_))
        )
    }

    fn name(self) -> &'static str {
        match self {
            Shape::String => "string",
            Shape::Integer => "integer",
            Shape::Numeric => "numeric",
            Shape::Boolean => "boolean",
            Shape::DateTime => "datetime",
            Shape::List => "list",
            Shape::Dict => "dict",
            Shape::Artifact => "artifact",
            Shape::Blob => "blob",
        }
    }
}

/// A single constraint
#[derive(Clone)]
pub enum Rule {
    Shape(Shape),
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    MinValue(f64),
    MaxValue(f64),
    AllowedValues(Vec<Value>),
    MinSize(usize),
    MaxSize(usize),
    Unique,
    MinKeys(usize),
    MaxKeys(usize),
    ReferenceTypes(Vec<String>),
    ReferenceVersion(String),
    MinBlobSize(u64),
    MaxBlobSize(u64),
    MinLocations(usize),
    MaxLocations(usize),
    Custom(Predicate),
}

impl Rule {
    /// Whether `value` violates this rule
    ///
    /// Rules that do not apply to the value's shape never fire; the shape
    /// rule installed first on every definition reports the mismatch.
    pub fn violated_by(&self, value: &Value) -> bool {
        match self {
            Rule::Shape(shape) => !shape.matches(value),
            Rule::MinLength(min) => value.as_str().is_some_and(|s| s.chars().count() < *min),
            Rule::MaxLength(max) => value.as_str().is_some_and(|s| s.chars().count() > *max),
            Rule::Pattern(re) => value.as_str().is_some_and(|s| !re.is_match(s)),
            Rule::MinValue(min) => value.as_f64().is_some_and(|n| n < *min),
            Rule::MaxValue(max) => value.as_f64().is_some_and(|n| n > *max),
            Rule::AllowedValues(allowed) => !allowed.contains(value),
            Rule::MinSize(min) => value.as_list().is_some_and(|l| l.len() < *min),
            Rule::MaxSize(max) => value.as_list().is_some_and(|l| l.len() > *max),
            Rule::Unique => value.as_list().is_some_and(|items| {
                items
                    .iter()
                    .enumerate()
                    .any(|(i, a)| items[i + 1..].iter().any(|b| a == b))
            }),
            Rule::MinKeys(min) => value.as_dict().is_some_and(|d| d.len() < *min),
            Rule::MaxKeys(max) => value.as_dict().is_some_and(|d| d.len() > *max),
            Rule::ReferenceTypes(names) => value
                .as_artifact()
                .is_some_and(|a| !names.iter().any(|n| n == a.type_name())),
            Rule::ReferenceVersion(version) => value
                .as_artifact()
                .is_some_and(|a| a.type_version() != version),
            Rule::MinBlobSize(min) => value.as_blob().is_some_and(|b| b.size < *min),
            Rule::MaxBlobSize(max) => value.as_blob().is_some_and(|b| b.size > *max),
            Rule::MinLocations(min) => value.as_blob().is_some_and(|b| b.locations.len() < *min),
            Rule::MaxLocations(max) => value.as_blob().is_some_and(|b| b.locations.len() > *max),
            Rule::Custom(predicate) => !predicate(value),
        }
    }

    /// Message used when no explicit one is given
    pub fn default_message(&self) -> String {
        match self {
            Rule::Shape(shape) => format!("Value must be of type {}", shape.name()),
            Rule::MinLength(n) => format!("Length is less than minimum {n}"),
            Rule::MaxLength(n) => format!("Length is greater than maximum {n}"),
            Rule::Pattern(re) => format!("Does not match pattern '{}'", re.as_str()),
            Rule::MinValue(n) => format!("Value is less than minimum {n}"),
            Rule::MaxValue(n) => format!("Value is greater than maximum {n}"),
            Rule::AllowedValues(_) => "Value is not one of the allowed values".to_string(),
            Rule::MinSize(n) => format!("List size is less than {n}"),
            Rule::MaxSize(n) => format!("List size is greater than {n}"),
            Rule::Unique => "Items have to be unique".to_string(),
            Rule::MinKeys(n) => format!("Dict size is less than {n}"),
            Rule::MaxKeys(n) => format!("Dict size is greater than {n}"),
            Rule::ReferenceTypes(names) => {
                format!("Referenced artifact must be of type {}", names.join(" or "))
            }
            Rule::ReferenceVersion(v) => format!("Referenced artifact must be of version {v}"),
            Rule::MinBlobSize(n) => format!("Blob size is less than {n}"),
            Rule::MaxBlobSize(n) => format!("Blob size is greater than {n}"),
            Rule::MinLocations(n) => format!("Blob has fewer than {n} locations"),
            Rule::MaxLocations(n) => format!("Blob has more than {n} locations"),
            Rule::Custom(_) => "Value failed validation".to_string(),
        }
    }

    /// Facet keyword and value for schema export
    pub fn schema_facet(&self) -> Option<(&'static str, JsonValue)> {
        Some(match self {
            Rule::Shape(_) | Rule::Custom(_) => return None,
            Rule::MinLength(n) => ("minLength", json!(n)),
            Rule::MaxLength(n) => ("maxLength", json!(n)),
            Rule::Pattern(re) => ("pattern", json!(re.as_str())),
            Rule::MinValue(n) => ("minimum", json!(n)),
            Rule::MaxValue(n) => ("maximum", json!(n)),
            Rule::AllowedValues(values) => {
                ("enum", JsonValue::Array(values.iter().map(Value::to_json).collect()))
            }
            Rule::MinSize(n) => ("minItems", json!(n)),
            Rule::MaxSize(n) => ("maxItems", json!(n)),
            Rule::Unique => ("uniqueItems", json!(true)),
            Rule::MinKeys(n) => ("minProperties", json!(n)),
            Rule::MaxKeys(n) => ("maxProperties", json!(n)),
            Rule::ReferenceTypes(names) => ("references", json!(names)),
            Rule::ReferenceVersion(v) => ("referenceVersion", json!(v)),
            Rule::MinBlobSize(n) => ("minSize", json!(n)),
            Rule::MaxBlobSize(n) => ("maxSize", json!(n)),
            Rule::MinLocations(n) => ("minLocations", json!(n)),
            Rule::MaxLocations(n) => ("maxLocations", json!(n)),
        })
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Custom(_) => write!(f, "Custom(..)"),
            Rule::Pattern(re) => write!(f, "Pattern({:?})", re.as_str()),
            other => match other.schema_facet() {
                Some((key, value)) => write!(f, "{key}={value}"),
                None => write!(f, "{}", other.default_message()),
            },
        }
    }
}

/// A rule installed under a named slot
#[derive(Clone, Debug)]
pub struct Validator {
    pub slot: String,
    pub rule: Rule,
    pub message: String,
}

impl Validator {
    pub fn new(slot: impl Into<String>, rule: Rule) -> Self {
        let message = rule.default_message();
        Self {
            slot: slot.into(),
            rule,
            message,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
