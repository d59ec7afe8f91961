//! Collection guards
//!
//! Mutable access to list and dict attributes goes through a guard. The
//! writable guards apply each mutation to a copy, re-validate the whole
//! value against the attribute definition and only then commit it to the
//! slot. Frozen guards expose the same read API and reject every mutation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attribute::AttributeDefinition;
use crate::error::ValidationError;
use crate::types::Slot;
use crate::value::Value;

static EMPTY_DICT: BTreeMap<String, Value> = BTreeMap::new();

fn out_of_range(attribute: &str, index: usize, len: usize) -> ValidationError {
    ValidationError::new(attribute, format!("Index {index} is out of range for a list of {len} items"))
}

/// List interface shared by writable and frozen guards
pub trait ListAccess {
    fn attribute(&self) -> &str;

    fn items(&self) -> &[Value];

    fn len(&self) -> usize {
        self.items().len()
    }

    fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    fn get(&self, index: usize) -> Option<&Value> {
        self.items().get(index)
    }

    fn append(&mut self, value: Value) -> Result<(), ValidationError>;

    fn extend(&mut self, values: Vec<Value>) -> Result<(), ValidationError>;

    /// Inserts before `index`; `index == len` appends
    fn insert(&mut self, index: usize, value: Value) -> Result<(), ValidationError>;

    /// Replaces the element at `index`
    fn set_item(&mut self, index: usize, value: Value) -> Result<(), ValidationError>;

    fn remove(&mut self, index: usize) -> Result<Value, ValidationError>;

    fn pop(&mut self) -> Result<Option<Value>, ValidationError>;

    fn clear(&mut self) -> Result<(), ValidationError>;
}

/// Dict interface shared by writable and frozen guards
pub trait DictAccess {
    fn attribute(&self) -> &str;

    fn entries(&self) -> &BTreeMap<String, Value>;

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.entries().get(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Inserts or overwrites `key`, returning the previous value
    fn insert(&mut self, key: String, value: Value) -> Result<Option<Value>, ValidationError>;

    /// Removes `key`; a missing key is not an error
    fn remove(&mut self, key: &str) -> Result<Option<Value>, ValidationError>;

    fn update(&mut self, entries: BTreeMap<String, Value>) -> Result<(), ValidationError>;

    fn clear(&mut self) -> Result<(), ValidationError>;
}

// ---------------------------------------------------------------------------
// Writable guards
// ---------------------------------------------------------------------------

/// Re-validating view over a list slot
pub struct ListGuard<'a> {
    attribute: String,
    definition: Arc<AttributeDefinition>,
    slot: &'a mut Slot,
}

impl<'a> ListGuard<'a> {
    pub(crate) fn new(attribute: &str, definition: Arc<AttributeDefinition>, slot: &'a mut Slot) -> Self {
        Self {
            attribute: attribute.to_string(),
            definition,
            slot,
        }
    }

    fn mutate<R>(&mut self, f: impl FnOnce(&mut Vec<Value>) -> Result<R, ValidationError>) -> Result<R, ValidationError> {
        let mut items = self.items().to_vec();
        let out = f(&mut items)?;
        let value = self.definition.normalize(Value::List(items));
        self.definition.validate_as(&self.attribute, Some(&value))?;
        self.slot.commit(Some(value), self.definition.is_readonly());
        Ok(out)
    }
}

impl ListAccess for ListGuard<'_> {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn items(&self) -> &[Value] {
        self.slot.value().and_then(Value::as_list).map(Vec::as_slice).unwrap_or(&[])
    }

    fn append(&mut self, value: Value) -> Result<(), ValidationError> {
        self.mutate(|items| {
            items.push(value);
            Ok(())
        })
    }

    fn extend(&mut self, values: Vec<Value>) -> Result<(), ValidationError> {
        self.mutate(|items| {
            items.extend(values);
            Ok(())
        })
    }

    fn insert(&mut self, index: usize, value: Value) -> Result<(), ValidationError> {
        let attribute = self.attribute.clone();
        self.mutate(|items| {
            if index > items.len() {
                return Err(out_of_range(&attribute, index, items.len()));
            }
            items.insert(index, value);
            Ok(())
        })
    }

    fn set_item(&mut self, index: usize, value: Value) -> Result<(), ValidationError> {
        let attribute = self.attribute.clone();
        self.mutate(|items| {
            let len = items.len();
            let slot = items.get_mut(index).ok_or_else(|| out_of_range(&attribute, index, len))?;
            *slot = value;
            Ok(())
        })
    }

    fn remove(&mut self, index: usize) -> Result<Value, ValidationError> {
        let attribute = self.attribute.clone();
        self.mutate(|items| {
            if index >= items.len() {
                return Err(out_of_range(&attribute, index, items.len()));
            }
            Ok(items.remove(index))
        })
    }

    fn pop(&mut self) -> Result<Option<Value>, ValidationError> {
        self.mutate(|items| Ok(items.pop()))
    }

    fn clear(&mut self) -> Result<(), ValidationError> {
        self.mutate(|items| {
            items.clear();
            Ok(())
        })
    }
}

/// Re-validating view over a dict slot
pub struct DictGuard<'a> {
    attribute: String,
    definition: Arc<AttributeDefinition>,
    slot: &'a mut Slot,
}

impl<'a> DictGuard<'a> {
    pub(crate) fn new(attribute: &str, definition: Arc<AttributeDefinition>, slot: &'a mut Slot) -> Self {
        Self {
            attribute: attribute.to_string(),
            definition,
            slot,
        }
    }

    fn mutate<R>(
        &mut self,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> R,
    ) -> Result<R, ValidationError> {
        let mut entries = self.entries().clone();
        let out = f(&mut entries);
        let value = self.definition.normalize(Value::Dict(entries));
        self.definition.validate_as(&self.attribute, Some(&value))?;
        self.slot.commit(Some(value), self.definition.is_readonly());
        Ok(out)
    }
}

impl DictAccess for DictGuard<'_> {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn entries(&self) -> &BTreeMap<String, Value> {
        self.slot.value().and_then(Value::as_dict).unwrap_or(&EMPTY_DICT)
    }

    fn insert(&mut self, key: String, value: Value) -> Result<Option<Value>, ValidationError> {
        self.mutate(|entries| entries.insert(key, value))
    }

    fn remove(&mut self, key: &str) -> Result<Option<Value>, ValidationError> {
        self.mutate(|entries| entries.remove(key))
    }

    fn update(&mut self, new_entries: BTreeMap<String, Value>) -> Result<(), ValidationError> {
        self.mutate(|entries| entries.extend(new_entries))
    }

    fn clear(&mut self) -> Result<(), ValidationError> {
        self.mutate(|entries| entries.clear())
    }
}

// ---------------------------------------------------------------------------
// Frozen guards
// ---------------------------------------------------------------------------

/// Read-only list view; every mutation fails
pub struct FrozenList<'a> {
    attribute: String,
    items: &'a [Value],
}

impl<'a> FrozenList<'a> {
    pub fn new(attribute: &str, items: &'a [Value]) -> Self {
        Self {
            attribute: attribute.to_string(),
            items,
        }
    }

    fn reject<R>(&self) -> Result<R, ValidationError> {
        Err(ValidationError::read_only(&self.attribute))
    }
}

impl ListAccess for FrozenList<'_> {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn items(&self) -> &[Value] {
        self.items
    }

    fn append(&mut self, _value: Value) -> Result<(), ValidationError> {
        self.reject()
    }

    fn extend(&mut self, _values: Vec<Value>) -> Result<(), ValidationError> {
        self.reject()
    }

    fn insert(&mut self, _index: usize, _value: Value) -> Result<(), ValidationError> {
        self.reject()
    }

    fn set_item(&mut self, _index: usize, _value: Value) -> Result<(), ValidationError> {
        self.reject()
    }

    fn remove(&mut self, _index: usize) -> Result<Value, ValidationError> {
        self.reject()
    }

    fn pop(&mut self) -> Result<Option<Value>, ValidationError> {
        self.reject()
    }

    fn clear(&mut self) -> Result<(), ValidationError> {
        self.reject()
    }
}

/// Read-only dict view; every mutation fails
pub struct FrozenDict<'a> {
    attribute: String,
    entries: &'a BTreeMap<String, Value>,
}

impl<'a> FrozenDict<'a> {
    pub fn new(attribute: &str, entries: Option<&'a BTreeMap<String, Value>>) -> Self {
        Self {
            attribute: attribute.to_string(),
            entries: entries.unwrap_or(&EMPTY_DICT),
        }
    }
}

impl DictAccess for FrozenDict<'_> {
    fn attribute(&self) -> &str {
        &self.attribute
    }

    fn entries(&self) -> &BTreeMap<String, Value> {
        self.entries
    }

    fn insert(&mut self, _key: String, _value: Value) -> Result<Option<Value>, ValidationError> {
        Err(ValidationError::read_only(&self.attribute))
    }

    fn remove(&mut self, _key: &str) -> Result<Option<Value>, ValidationError> {
        Err(ValidationError::read_only(&self.attribute))
    }

    fn update(&mut self, _entries: BTreeMap<String, Value>) -> Result<(), ValidationError> {
        Err(ValidationError::read_only(&self.attribute))
    }

    fn clear(&mut self) -> Result<(), ValidationError> {
        Err(ValidationError::read_only(&self.attribute))
    }
}
