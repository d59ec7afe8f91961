//! Proxy chain behaviour through the engine: relations, lifecycle and blobs

use std::sync::Arc;

use bytes::Bytes;
use tessera_core::{
    ArtifactState, AttributeDefinition, Blob, BlobLocation, DependencyError, InMemoryTypeRegistry, TypeDescriptor,
    ValidationError, Value,
};
use tessera_engine::{
    ArtifactEngine, ArtifactHandle, ArtifactProxy, AttributeInput, BlobStorage, BlobStorageError, BlobUpload,
    EngineConfig, EngineError, InMemoryBlobStorage, InMemoryPersistence, PatchOperation,
};

// ============================================================
// Helpers
// ============================================================

fn engine_with(config: EngineConfig, storage: Arc<InMemoryBlobStorage>) -> ArtifactEngine {
    let engine = ArtifactEngine::new(
        config,
        Arc::new(InMemoryPersistence::new()),
        storage,
        Arc::new(InMemoryTypeRegistry::new()),
    )
    .unwrap();
    engine
        .register_type(
            TypeDescriptor::new("Node", "1.0.0")
                .attribute("depends_on", AttributeDefinition::relation())
                .attribute("links", AttributeDefinition::relation_list())
                .attribute("image", AttributeDefinition::blob())
                .attribute("thumb", AttributeDefinition::blob().max_blob_size(3))
                .attribute("layers", AttributeDefinition::blob_list()),
        )
        .unwrap();
    engine
        .register_type(
            TypeDescriptor::new("Package", "1.0.0")
                .attribute("archive", AttributeDefinition::blob().required())
                .attribute("base", AttributeDefinition::relation().required()),
        )
        .unwrap();
    engine
}

fn engine() -> (ArtifactEngine, Arc<InMemoryBlobStorage>) {
    let storage = Arc::new(InMemoryBlobStorage::new());
    (engine_with(EngineConfig::default(), Arc::clone(&storage)), storage)
}

fn stored_node(engine: &ArtifactEngine, name: &str) -> ArtifactHandle {
    engine
        .add(&engine.create("Node", None, name, "1.0.0").unwrap())
        .unwrap()
}

fn depend(handle: &mut ArtifactHandle, attribute: &str, target: &ArtifactHandle) {
    handle
        .set_attribute(attribute, AttributeInput::Reference(target.base().id.clone()))
        .unwrap();
}

// ============================================================
// Dependencies
// ============================================================

#[test]
fn test_publish_requires_active_dependencies() {
    let (engine, _) = engine();
    let a = stored_node(&engine, "a");
    let mut b = engine.create("Node", None, "b", "1.0.0").unwrap();
    depend(&mut b, "depends_on", &a);
    let b = engine.add(&b).unwrap();

    let err = engine.publish(&b).unwrap_err();
    match &err {
        EngineError::Dependency(DependencyError::NotActive { dependency_id, state, .. }) => {
            assert_eq!(dependency_id, &a.base().id);
            assert_eq!(state, "creating");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("not all dependencies are in 'active' state"));

    let a = engine.publish(&a).unwrap();
    assert_eq!(a.base().state, ArtifactState::Active);
    assert!(a.base().published_at.is_some());

    let b = engine.publish(&b).unwrap();
    assert_eq!(b.base().state, ArtifactState::Active);
}

#[test]
fn test_remove_requires_cleared_dependencies() {
    let (engine, _) = engine();
    let a = stored_node(&engine, "a");
    let mut b = engine.create("Node", None, "b", "1.0.0").unwrap();
    depend(&mut b, "depends_on", &a);
    let b = engine.add(&b).unwrap();

    let err = engine.remove(&b).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Dependency(DependencyError::PopulatedDependency { ref attribute }) if attribute == "depends_on"
    ));

    let b = engine.patch(&b.base().id, &[PatchOperation::remove("/depends_on")]).unwrap();
    assert!(b.base().peek("depends_on").is_none());
    engine.remove(&b).unwrap();

    let removed = engine.get(&b.base().id).unwrap();
    assert_eq!(removed.base().state, ArtifactState::Deleted);
    assert!(removed.base().deleted_at.is_some());
}

#[test]
fn test_self_reference_rejected_through_layers() {
    let (engine, _) = engine();
    let mut node = stored_node(&engine, "self");

    let own_id = node.base().id.clone();
    let err = node
        .set_attribute("depends_on", AttributeInput::Reference(own_id))
        .unwrap_err();
    assert!(matches!(err, EngineError::Dependency(DependencyError::Circular { .. })));

    let same = node.clone();
    let err = node
        .set_attribute("depends_on", AttributeInput::layered(same))
        .unwrap_err();
    assert!(matches!(err, EngineError::Dependency(DependencyError::Circular { .. })));
}

#[test]
fn test_unwrap_depth_bounded() {
    let config = EngineConfig {
        max_unwrap_depth: 1,
        ..EngineConfig::default()
    };
    let engine = engine_with(config, Arc::new(InMemoryBlobStorage::new()));
    let mut a = stored_node(&engine, "a");
    let b = stored_node(&engine, "b");

    let err = a
        .set_attribute("depends_on", AttributeInput::layered(b))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Dependency(DependencyError::UnwrapDepthExceeded { depth: 1 })
    ));
}

#[test]
fn test_layered_handle_stored_as_base() {
    let (engine, _) = engine();
    let mut a = stored_node(&engine, "a");
    let b = stored_node(&engine, "b");
    let b_id = b.base().id.clone();

    a.set_attribute("depends_on", AttributeInput::layered(b)).unwrap();
    let a = engine.save(&a).unwrap();

    let deps = engine.dependencies(&a, "depends_on");
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].base().id, b_id);
}

#[test]
fn test_two_hop_cycle_is_constructible() {
    let (engine, _) = engine();
    let mut a = stored_node(&engine, "a");
    let mut b = stored_node(&engine, "b");

    depend(&mut a, "depends_on", &b);
    let a = engine.save(&a).unwrap();
    depend(&mut b, "depends_on", &a);
    engine.save(&b).unwrap();

    let fetched = engine.get(&a.base().id).unwrap();
    let deps = engine.dependencies(&fetched, "depends_on");
    assert_eq!(deps[0].base().id, b.base().id);
}

#[test]
fn test_reference_list_and_missing_reference() {
    let (engine, _) = engine();
    let a = stored_node(&engine, "a");
    let b = stored_node(&engine, "b");
    let mut c = engine.create("Node", None, "c", "1.0.0").unwrap();

    c.set_attribute(
        "links",
        AttributeInput::References(vec![a.base().id.clone(), b.base().id.clone()]),
    )
    .unwrap();
    let c = engine.add(&c).unwrap();
    let links: Vec<String> = engine
        .dependencies(&c, "links")
        .iter()
        .map(|h| h.base().id.clone())
        .collect();
    assert_eq!(links, vec![a.base().id.clone(), b.base().id.clone()]);

    let mut d = engine.create("Node", None, "d", "1.0.0").unwrap();
    let err = d
        .set_attribute("depends_on", AttributeInput::Reference("nope".to_string()))
        .unwrap_err();
    assert!(matches!(err, EngineError::Dependency(DependencyError::NotFound(_))));
}

#[test]
fn test_publish_checks_required_blobs_and_dependencies() {
    let (engine, _) = engine();
    let package = engine
        .add(&engine.create("Package", None, "pkg", "1.0.0").unwrap())
        .unwrap();
    let err = engine.publish(&package).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError { .. })));
}

// ============================================================
// Blobs
// ============================================================

#[test]
fn test_blob_upload_and_read() {
    let (engine, storage) = engine();
    let mut node = engine.create("Node", None, "img", "1.0.0").unwrap();
    node.set_attribute("image", AttributeInput::Upload(BlobUpload::new(&b"raw bytes"[..])))
        .unwrap();
    let node = engine.add(&node).unwrap();

    let blob = node.base().peek("image").and_then(Value::as_blob).unwrap();
    assert!(blob.item_key.starts_with(&format!("{}.image.", node.base().id)));
    assert_eq!(blob.size, 9);
    assert_eq!(blob.checksum.as_deref(), Some(blake3::hash(b"raw bytes").to_hex().as_str()));
    assert_eq!(storage.len(), 1);
    assert_eq!(engine.read_blob(&node, "image", None).unwrap(), Bytes::from_static(b"raw bytes"));
}

#[test]
fn test_blob_replace_and_clear() {
    let (engine, storage) = engine();
    let mut node = stored_node(&engine, "img");
    node.set_attribute("image", AttributeInput::Upload(BlobUpload::new(&b"one"[..])))
        .unwrap();
    node.set_attribute("image", AttributeInput::Upload(BlobUpload::new(&b"two"[..])))
        .unwrap();
    assert_eq!(storage.len(), 1);
    assert_eq!(&engine.read_blob(&node, "image", None).unwrap()[..], b"two");
    let node = engine.save(&node).unwrap();

    let node = engine.patch(&node.base().id, &[PatchOperation::remove("/image")]).unwrap();
    assert!(node.base().peek("image").is_none());
    assert!(storage.is_empty());
}

#[test]
fn test_rejected_replacement_keeps_stored_data() {
    let (engine, storage) = engine();
    let mut node = stored_node(&engine, "thumbs");
    node.set_attribute("thumb", AttributeInput::Upload(BlobUpload::new(&b"abc"[..])))
        .unwrap();
    let before = node.base().peek("thumb").and_then(Value::as_blob).unwrap().clone();

    let err = node
        .set_attribute("thumb", AttributeInput::Upload(BlobUpload::new(&b"abcdef"[..])))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let after = node.base().peek("thumb").and_then(Value::as_blob).unwrap();
    assert_eq!(after, &before);
    assert_eq!(after.size, 3);
    assert_eq!(&engine.read_blob(&node, "thumb", None).unwrap()[..], b"abc");
    assert_eq!(storage.len(), 1);
}

#[test]
fn test_blob_list_items_have_distinct_keys() {
    let (engine, storage) = engine();
    let mut node = stored_node(&engine, "layers");
    node.set_attribute(
        "layers",
        AttributeInput::Uploads(vec![BlobUpload::new(&b"same"[..]), BlobUpload::new(&b"same"[..])]),
    )
    .unwrap();
    assert_eq!(storage.len(), 2);

    let items = node.base().peek("layers").and_then(Value::as_list).unwrap();
    let keys: Vec<&str> = items
        .iter()
        .filter_map(Value::as_blob)
        .map(|b| b.item_key.as_str())
        .collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);

    node.inner_mut().append_blob("layers", BlobUpload::new(&b"third"[..])).unwrap();
    assert_eq!(&engine.read_blob(&node, "layers", Some(2)).unwrap()[..], b"third");

    let node = engine.save(&node).unwrap();
    let node = engine.patch(&node.base().id, &[PatchOperation::remove("/layers/0")]).unwrap();
    assert_eq!(node.base().peek("layers").and_then(Value::len), Some(2));
    assert_eq!(storage.len(), 2);
}

#[test]
fn test_read_falls_back_across_locations() {
    let (engine, storage) = engine();
    let receipt = storage.upload("mirror", Bytes::from_static(b"mirrored"), None).unwrap();
    let mut node = stored_node(&engine, "img");

    let blob = Blob::new("mirror", receipt.size, Some(receipt.checksum.clone()))
        .with_location(BlobLocation::active("memory://gone"))
        .with_location(BlobLocation::active(receipt.location.clone()));
    node.set_attribute("image", Value::Blob(blob).into()).unwrap();
    assert_eq!(&engine.read_blob(&node, "image", None).unwrap()[..], b"mirrored");

    let broken = Blob::new("broken", 0, None)
        .with_location(BlobLocation::active("memory://gone"))
        .with_location(BlobLocation::active("s3://bucket/gone"));
    node.set_attribute("image", Value::Blob(broken).into()).unwrap();
    let err = engine.read_blob(&node, "image", None).unwrap_err();
    assert!(matches!(err, EngineError::Storage(BlobStorageError::UnsupportedBackend(_))));
}

#[test]
fn test_failed_deletes_are_swallowed() {
    let storage = Arc::new(InMemoryBlobStorage::without_deletes());
    let engine = engine_with(EngineConfig::default(), Arc::clone(&storage));
    let mut node = stored_node(&engine, "img");
    node.set_attribute("image", AttributeInput::Upload(BlobUpload::new(&b"kept"[..])))
        .unwrap();

    node.set_attribute("image", AttributeInput::Value(None)).unwrap();
    assert!(node.base().peek("image").is_none());
    assert_eq!(storage.len(), 1);
}

#[test]
fn test_blob_patch_add_rejected() {
    let (engine, _) = engine();
    let node = stored_node(&engine, "img");
    let err = engine
        .patch(&node.base().id, &[PatchOperation::add("/image", serde_json::json!("bytes"))])
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}
