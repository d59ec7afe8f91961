use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tessera_core::{Artifact, ArtifactLayer, Blob, BlobLocation, Section, Unwrapped, ValidationError, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ArtifactProxy, AttributeInput, BlobUpload};
use crate::error::{BlobStorageError, EngineError, EngineResult};
use crate::storage::BlobStorage;

/// Routes blob attribute writes through a [`BlobStorage`]
///
/// Uploaded data is recorded as a [`Blob`] with one active location. Data
/// no longer referenced after a write is deleted from storage; deletion
/// failures are logged and swallowed.
#[derive(Clone)]
pub struct LocationProxy<P> {
    inner: P,
    storage: Arc<dyn BlobStorage>,
}

impl<P: ArtifactProxy> LocationProxy<P> {
    pub fn new(inner: P, storage: Arc<dyn BlobStorage>) -> Self {
        Self { inner, storage }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    // -----------------------------------------------------------------------
    // List-of-blob mutation
    // -----------------------------------------------------------------------

    /// Uploads `upload` and appends it to a list-of-blob attribute
    pub fn append_blob(&mut self, name: &str, upload: BlobUpload) -> EngineResult<()> {
        self.blob_definition(name, true)?;
        self.check_writable(name)?;
        let blob = self.store(name, upload)?;
        let result = self
            .inner
            .base_mut()
            .list_mut(name)
            .and_then(|mut list| list.append(Value::Blob(blob.clone())));
        self.commit(name, result, &[blob], Vec::new())
    }

    /// Uploads `upload` and inserts it before `index`
    pub fn insert_blob(&mut self, name: &str, index: usize, upload: BlobUpload) -> EngineResult<()> {
        self.blob_definition(name, true)?;
        self.check_writable(name)?;
        let blob = self.store(name, upload)?;
        let result = self
            .inner
            .base_mut()
            .list_mut(name)
            .and_then(|mut list| list.insert(index, Value::Blob(blob.clone())));
        self.commit(name, result, &[blob], Vec::new())
    }

    /// Re-uploads the item at `index`, deleting the data it replaced
    pub fn replace_blob(&mut self, name: &str, index: usize, upload: BlobUpload) -> EngineResult<()> {
        self.blob_definition(name, true)?;
        self.check_writable(name)?;
        let blob = self.store(name, upload)?;
        let mut previous = None;
        let result = self.inner.base_mut().list_mut(name).and_then(|mut list| {
            previous = list.get(index).cloned();
            list.set_item(index, Value::Blob(blob.clone()))
        });
        let stale = previous.as_ref().map(locations_of).unwrap_or_default();
        self.commit(name, result, &[blob], stale)
    }

    /// Removes the item at `index` and deletes its data
    pub fn remove_blob(&mut self, name: &str, index: usize) -> EngineResult<()> {
        self.blob_definition(name, true)?;
        let removed = self.inner.base_mut().list_mut(name)?.remove(index)?;
        self.delete_locations(name, locations_of(&removed));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Downloads the data of a blob attribute
    ///
    /// For a list of blobs `index` selects the item. Active locations are
    /// tried in order; the first one yielding data wins, otherwise the last
    /// error is returned.
    pub fn read_blob(&self, name: &str, index: Option<usize>) -> EngineResult<Bytes> {
        let is_list = self.blob_definition(name, false)?;
        let value = self
            .base()
            .peek(name)
            .ok_or_else(|| ValidationError::new(name, "Blob attribute is not set"))?;
        let blob = match (value, index) {
            (Value::Blob(blob), None) if !is_list => blob,
            (Value::List(items), Some(i)) => items.get(i).and_then(Value::as_blob).ok_or_else(|| {
                ValidationError::new(name, format!("Index {i} is out of range for a list of {} items", items.len()))
            })?,
            _ => {
                return Err(ValidationError::new(name, "Blob index does not match the attribute kind").into());
            }
        };

        let mut last_error = None;
        for location in blob.active_locations() {
            match self.storage.download(&location.value) {
                Ok((data, _size)) => return Ok(data),
                Err(err) => {
                    warn!(
                        artifact_id = %self.base().id,
                        attribute = name,
                        location = %location.value,
                        error = %err,
                        "blob location unreadable"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| BlobStorageError::NotFound(blob.item_key.clone()))
            .into())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Checks that `name` is a blob attribute and returns whether it is a list
    fn blob_definition(&self, name: &str, require_list: bool) -> Result<bool, ValidationError> {
        let accessor = self
            .base()
            .type_meta()
            .accessor(name)
            .ok_or_else(|| ValidationError::unknown_property(name))?;
        if accessor.section() != Section::Blob {
            return Err(ValidationError::new(name, "Attribute is not a blob"));
        }
        let is_list = accessor.definition().is_list();
        if require_list && !is_list {
            return Err(ValidationError::new(name, "Attribute is not a list of blobs"));
        }
        Ok(is_list)
    }

    /// Refuses uploads to attributes that could not take the result
    fn check_writable(&self, name: &str) -> Result<(), ValidationError> {
        if self.base().is_read_only(name) {
            return Err(ValidationError::read_only(name));
        }
        Ok(())
    }

    /// Fresh key per upload, so a rejected write never lands on live data
    fn item_key(&self, name: &str) -> String {
        format!("{}.{name}.{}", self.base().id, Uuid::new_v4().simple())
    }

    fn store(&self, name: &str, upload: BlobUpload) -> EngineResult<Blob> {
        let key = self.item_key(name);
        let receipt = self.storage.upload(&key, upload.data, upload.size)?;
        debug!(
            artifact_id = %self.base().id,
            attribute = name,
            location = %receipt.location,
            size = receipt.size,
            "uploaded blob data"
        );
        Ok(Blob::new(key, receipt.size, Some(receipt.checksum)).with_location(BlobLocation::active(receipt.location)))
    }

    /// Finishes a write: drops fresh uploads on failure, stale data on success
    fn commit<E>(&self, name: &str, result: Result<(), E>, uploaded: &[Blob], stale: Vec<String>) -> EngineResult<()>
    where
        E: Into<EngineError>,
    {
        match result {
            Ok(()) => {
                let kept: HashSet<&str> = self.referenced_locations().into_iter().collect();
                let stale: Vec<String> = stale.into_iter().filter(|l| !kept.contains(l.as_str())).collect();
                self.delete_locations(name, stale);
                Ok(())
            }
            Err(err) => {
                let kept: HashSet<&str> = self.referenced_locations().into_iter().collect();
                let fresh = uploaded
                    .iter()
                    .flat_map(locations_of_blob)
                    .filter(|l| !kept.contains(l.as_str()))
                    .collect();
                self.delete_locations(name, fresh);
                Err(err.into())
            }
        }
    }

    /// Every location referenced by any blob attribute of the artifact
    fn referenced_locations(&self) -> Vec<&str> {
        let base = self.base();
        base.type_meta()
            .registry()
            .blobs()
            .filter_map(|accessor| base.peek(accessor.name()))
            .flat_map(|value| match value {
                Value::Blob(blob) => vec![blob],
                Value::List(items) => items.iter().filter_map(Value::as_blob).collect(),
                _ => Vec::new(),
            })
            .flat_map(|blob| blob.locations.iter().map(|l| l.value.as_str()))
            .collect()
    }

    fn delete_locations(&self, attribute: &str, locations: Vec<String>) {
        for location in locations {
            match self.storage.delete(&location) {
                Ok(()) => debug!(location = %location, "deleted blob data"),
                Err(err) => warn!(
                    artifact_id = %self.base().id,
                    attribute,
                    location = %location,
                    error = %err,
                    "failed to delete blob data"
                ),
            }
        }
    }
}

fn locations_of(value: &Value) -> Vec<String> {
    match value {
        Value::Blob(blob) => blob.locations.iter().map(|l| l.value.clone()).collect(),
        Value::List(items) => items.iter().flat_map(locations_of).collect(),
        _ => Vec::new(),
    }
}

impl<P: ArtifactProxy> ArtifactLayer for LocationProxy<P> {
    fn unwrap_layer(&self) -> Unwrapped<'_> {
        Unwrapped::Layer(&self.inner)
    }
}

impl<P: ArtifactProxy> ArtifactProxy for LocationProxy<P> {
    fn base(&self) -> &Artifact {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut Artifact {
        self.inner.base_mut()
    }

    fn set_attribute(&mut self, name: &str, input: AttributeInput) -> EngineResult<()> {
        let is_list = match self.blob_definition(name, false) {
            Ok(is_list) => is_list,
            Err(_) => return self.inner.set_attribute(name, input),
        };

        if matches!(input, AttributeInput::Upload(_) | AttributeInput::Uploads(_)) {
            self.check_writable(name)?;
        }
        let stale = self.base().peek(name).map(locations_of).unwrap_or_default();
        let (value, uploaded) = match input {
            AttributeInput::Upload(upload) if !is_list => {
                let blob = self.store(name, upload)?;
                (Some(Value::Blob(blob.clone())), vec![blob])
            }
            AttributeInput::Uploads(uploads) if is_list => {
                let mut blobs = Vec::with_capacity(uploads.len());
                for upload in uploads {
                    match self.store(name, upload) {
                        Ok(blob) => blobs.push(blob),
                        Err(err) => {
                            let fresh = blobs.iter().flat_map(locations_of_blob).collect();
                            self.delete_locations(name, fresh);
                            return Err(err);
                        }
                    }
                }
                let value = Value::List(blobs.iter().cloned().map(Value::Blob).collect());
                (Some(value), blobs)
            }
            AttributeInput::Value(value) => (value, Vec::new()),
            other => return Err(other.unsupported(name).into()),
        };

        let result = self.inner.set_attribute(name, AttributeInput::Value(value));
        self.commit(name, result, &uploaded, stale)
    }
}

fn locations_of_blob(blob: &Blob) -> Vec<String> {
    blob.locations.iter().map(|l| l.value.clone()).collect()
}

impl<P: fmt::Debug> fmt::Debug for LocationProxy<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationProxy")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
