//! Blob storage collaborator
//!
//! The location proxy hands blob bytes to a [`BlobStorage`] and records the
//! location token it returns. [`InMemoryBlobStorage`] is the reference
//! backend, serving `memory://` locations.

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::error::BlobStorageError;

/// Scheme of locations served by [`InMemoryBlobStorage`]
pub const MEMORY_SCHEME: &str = "memory://";

/// What a backend reports after storing blob data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Token to hand back to `download`/`delete`
    pub location: String,
    /// Resolved size; 0 when neither caller nor backend knows it
    pub size: u64,
    pub checksum: String,
}

/// Byte transport for blob attributes
pub trait BlobStorage: Send + Sync {
    fn upload(&self, key: &str, data: Bytes, size: Option<u64>) -> Result<UploadReceipt, BlobStorageError>;

    fn download(&self, location: &str) -> Result<(Bytes, u64), BlobStorageError>;

    fn delete(&self, location: &str) -> Result<(), BlobStorageError>;
}

/// Keeps blob data in memory, keyed by location token
#[derive(Debug)]
pub struct InMemoryBlobStorage {
    objects: DashMap<String, Bytes>,
    deletes_enabled: bool,
}

impl Default for InMemoryBlobStorage {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
            deletes_enabled: true,
        }
    }
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that refuses every delete with `DeleteNotSupported`
    pub fn without_deletes() -> Self {
        Self {
            deletes_enabled: false,
            ..Self::default()
        }
    }

    pub fn location_for(key: &str) -> String {
        format!("{MEMORY_SCHEME}{key}")
    }

    pub fn contains(&self, location: &str) -> bool {
        self.objects.contains_key(location)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn check_backend(location: &str) -> Result<(), BlobStorageError> {
        if location.starts_with(MEMORY_SCHEME) {
            Ok(())
        } else {
            Err(BlobStorageError::UnsupportedBackend(location.to_string()))
        }
    }
}

impl BlobStorage for InMemoryBlobStorage {
    fn upload(&self, key: &str, data: Bytes, size: Option<u64>) -> Result<UploadReceipt, BlobStorageError> {
        let location = Self::location_for(key);
        let size = size.unwrap_or(data.len() as u64);
        let checksum = blake3::hash(&data).to_hex().to_string();
        self.objects.insert(location.clone(), data);
        debug!(location = %location, size, "stored blob data");
        Ok(UploadReceipt {
            location,
            size,
            checksum,
        })
    }

    fn download(&self, location: &str) -> Result<(Bytes, u64), BlobStorageError> {
        Self::check_backend(location)?;
        let data = self
            .objects
            .get(location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobStorageError::NotFound(location.to_string()))?;
        let size = data.len() as u64;
        Ok((data, size))
    }

    fn delete(&self, location: &str) -> Result<(), BlobStorageError> {
        Self::check_backend(location)?;
        if !self.deletes_enabled {
            return Err(BlobStorageError::DeleteNotSupported(location.to_string()));
        }
        self.objects
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| BlobStorageError::NotFound(location.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_download_delete() {
        let storage = InMemoryBlobStorage::new();
        let receipt = storage.upload("a1.image", Bytes::from_static(b"hello"), None).unwrap();
        assert_eq!(receipt.location, "memory://a1.image");
        assert_eq!(receipt.size, 5);
        assert_eq!(receipt.checksum, blake3::hash(b"hello").to_hex().to_string());

        let (data, size) = storage.download(&receipt.location).unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(size, 5);

        storage.delete(&receipt.location).unwrap();
        assert!(matches!(
            storage.download(&receipt.location),
            Err(BlobStorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_caller_size_wins() {
        let storage = InMemoryBlobStorage::new();
        let receipt = storage.upload("k", Bytes::from_static(b"abc"), Some(10)).unwrap();
        assert_eq!(receipt.size, 10);
    }

    #[test]
    fn test_foreign_scheme_unsupported() {
        let storage = InMemoryBlobStorage::new();
        assert!(matches!(
            storage.download("s3://bucket/key"),
            Err(BlobStorageError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_deletes_disabled() {
        let storage = InMemoryBlobStorage::without_deletes();
        let receipt = storage.upload("k", Bytes::from_static(b"x"), None).unwrap();
        assert!(matches!(
            storage.delete(&receipt.location),
            Err(BlobStorageError::DeleteNotSupported(_))
        ));
        assert!(storage.contains(&receipt.location));
    }
}
