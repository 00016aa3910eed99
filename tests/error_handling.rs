//! Error handling and edge case tests.

use livedoc::{
    CollectionKey, Connector, DeleteOutcome, Document, DocumentStore, Driver, DriverConfig,
    DriverError, Filter, InsertOutcome, MemoryConnector, MemoryStore, UpdateOutcome,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

fn words() -> CollectionKey {
    CollectionKey::new("words", "dutch")
}

// --- Connection Errors ---

#[test]
fn test_unreachable_store_fails_read_and_recovers() {
    let dir = TempDir::new().unwrap();
    // A regular file where the store directory's parent should be
    let blocker = dir.path().join("blocked");
    fs::write(&blocker, b"not a directory").unwrap();
    let address = blocker.join("store").display().to_string();

    let driver = Driver::new("document", DriverConfig::new(address.clone())).unwrap();

    let err = driver.read(&words()).err().unwrap();
    match &err {
        DriverError::Connection { address: a, cause } => {
            assert_eq!(a, &address);
            assert!(!cause.is_empty());
        }
        other => panic!("expected connection error, got {:?}", other),
    }
    assert!(err.to_string().contains(&address));
    assert!(driver.registered_collections().is_empty());

    // Make the address reachable and retry on the same driver
    fs::remove_file(&blocker).unwrap();
    let sub = driver.read(&words()).unwrap();
    assert!(sub.recv_timeout(Duration::from_secs(1)).unwrap().is_empty());
    assert_eq!(driver.registered_collections(), vec![words()]);
}

#[test]
fn test_missing_store_without_create() {
    let dir = TempDir::new().unwrap();
    let config = DriverConfig::new(dir.path().join("absent").display().to_string())
        .with_create_if_missing(false);
    let driver = Driver::new("document", config).unwrap();

    let err = driver.check_connection().unwrap_err();
    assert!(err.is_connection());
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn test_removed_store_is_reported_then_reconnected() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    let driver = Driver::new("document", DriverConfig::new(root.display().to_string())).unwrap();
    driver.insert(&words(), doc(json!({"name": "weg"}))).unwrap();

    fs::remove_dir_all(&root).unwrap();
    let err = driver.insert(&words(), doc(json!({"name": "terug"}))).unwrap_err();
    assert!(err.is_connection());

    // Next call reconnects (and recreates the store)
    driver.insert(&words(), doc(json!({"name": "terug"}))).unwrap();
    assert_eq!(driver.snapshot(&words()).unwrap().len(), 1);
}

// --- Backend Selection ---

#[test]
fn test_backend_not_supported_names_backend() {
    let err = Driver::new("mysql", DriverConfig::default()).err().unwrap();
    assert!(matches!(err, DriverError::BackendNotSupported(ref b) if b == "mysql"));
    assert!(err.to_string().contains("mysql"));
}

// --- Store Errors ---

#[test]
fn test_duplicate_id_is_store_operation_error() {
    let driver = Driver::new("memory", DriverConfig::new("memory")).unwrap();
    let view = driver.view(&words()).unwrap();
    driver
        .insert(&words(), doc(json!({"_id": "a", "name": "een"})))
        .unwrap();
    let publishes = view.publish_count();

    let err = driver
        .insert(&words(), doc(json!({"_id": "a", "name": "ander"})))
        .unwrap_err();
    assert!(matches!(err, DriverError::StoreOperation(_)));
    assert_eq!(view.publish_count(), publishes);
    assert_eq!(view.latest().len(), 1);
}

#[test]
fn test_unwritable_collection_file_is_store_operation_error() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("store");
    let driver = Driver::new("document", DriverConfig::new(root.display().to_string())).unwrap();
    driver.insert(&words(), doc(json!({"name": "eerst"}))).unwrap();
    let view = driver.view(&words()).unwrap();

    // Replace the data file with a directory
    let data = root.join("words").join("dutch.jsonl");
    fs::remove_file(&data).unwrap();
    fs::create_dir(&data).unwrap();

    let err = driver.insert(&words(), doc(json!({"name": "daarna"}))).unwrap_err();
    assert!(matches!(err, DriverError::StoreOperation(_)), "{:?}", err);
    assert_eq!(view.latest().len(), 1);

    let err = driver.delete(&words(), livedoc::DeleteTarget::All).unwrap_err();
    assert!(matches!(err, DriverError::StoreOperation(_)), "{:?}", err);
}

#[test]
fn test_unregistered_collection_when_auto_register_disabled() {
    let config = DriverConfig::new("memory").with_auto_register(false);
    let driver = Driver::new("memory", config).unwrap();

    let err = driver.delete(&words(), livedoc::DeleteTarget::All).unwrap_err();
    assert!(matches!(err, DriverError::UnregisteredCollection(ref k) if *k == words()));

    driver.read(&words()).unwrap();
    driver.delete(&words(), livedoc::DeleteTarget::All).unwrap();
}

/// Store whose reads can be switched to fail after writes succeed.
struct FlakyReadStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
}

impl DocumentStore for FlakyReadStore {
    fn find(&self, key: &CollectionKey) -> livedoc::Result<Vec<Document>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::StoreOperation("read timed out".to_string()));
        }
        self.inner.find(key)
    }

    fn insert_many(&self, key: &CollectionKey, docs: Vec<Document>) -> livedoc::Result<InsertOutcome> {
        self.inner.insert_many(key, docs)
    }

    fn update_one(
        &self,
        key: &CollectionKey,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> livedoc::Result<UpdateOutcome> {
        self.inner.update_one(key, filter, patch)
    }

    fn delete_one(&self, key: &CollectionKey, filter: &Filter) -> livedoc::Result<DeleteOutcome> {
        self.inner.delete_one(key, filter)
    }

    fn delete_many(&self, key: &CollectionKey, filter: &Filter) -> livedoc::Result<DeleteOutcome> {
        self.inner.delete_many(key, filter)
    }
}

struct FlakyConnector(Arc<FlakyReadStore>);

impl Connector for FlakyConnector {
    fn connect(&self, _address: &str) -> livedoc::Result<Arc<dyn DocumentStore>> {
        Ok(self.0.clone())
    }
}

#[test]
fn test_failed_reread_surfaces_but_write_stays() {
    let store = Arc::new(FlakyReadStore {
        inner: MemoryStore::new(),
        fail_reads: AtomicBool::new(false),
    });
    let driver =
        Driver::with_connector(Arc::new(FlakyConnector(store.clone())), DriverConfig::new("flaky"))
            .unwrap();
    let view = driver.view(&words()).unwrap();

    store.fail_reads.store(true, Ordering::SeqCst);
    let err = driver.insert(&words(), doc(json!({"name": "x"}))).unwrap_err();
    assert!(matches!(err, DriverError::StoreOperation(ref m) if m.contains("timed out")));
    assert_eq!(view.publish_count(), 0);

    // Write committed at the store
    store.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(store.inner.find(&words()).unwrap().len(), 1);

    driver.delete(&words(), doc(json!({"name": "nothing"}))).unwrap();
    assert_eq!(view.latest().len(), 1);
}

#[test]
fn test_failed_initial_read_is_retried() {
    let store = Arc::new(FlakyReadStore {
        inner: MemoryStore::new(),
        fail_reads: AtomicBool::new(true),
    });
    let driver =
        Driver::with_connector(Arc::new(FlakyConnector(store.clone())), DriverConfig::new("flaky"))
            .unwrap();

    assert!(driver.read(&words()).is_err());
    assert!(driver.registered_collections().is_empty());

    store.fail_reads.store(false, Ordering::SeqCst);
    assert!(driver.read(&words()).is_ok());
    assert_eq!(driver.registered_collections().len(), 1);
}

#[test]
fn test_memory_offline_is_connection_error() {
    let connector = MemoryConnector::new();
    let store = connector.store().clone();
    let driver = Driver::with_connector(Arc::new(connector), DriverConfig::new("memory")).unwrap();

    store.set_offline(true);
    assert!(driver.read(&words()).err().unwrap().is_connection());
    store.set_offline(false);
    assert!(driver.read(&words()).is_ok());
}

// --- Document Validation ---

#[test]
fn test_invalid_documents_rejected() {
    assert!(matches!(
        Document::from_value(json!("text")),
        Err(DriverError::InvalidDocument(_))
    ));

    let driver = Driver::new("memory", DriverConfig::new("memory")).unwrap();
    assert!(matches!(
        driver.insert(&words(), Vec::<Document>::new()),
        Err(DriverError::InvalidDocument(_))
    ));
}

#[test]
fn test_numeric_id_never_reaches_the_store() {
    let dir = TempDir::new().unwrap();
    let driver = Driver::new(
        "document",
        DriverConfig::new(dir.path().join("store").display().to_string()),
    )
    .unwrap();

    let fields = json!({"_id": 7, "name": "zeven"}).as_object().unwrap().clone();
    assert!(matches!(Document::new(fields), Err(DriverError::InvalidDocument(_))));

    let fields = json!({"name": "zeven"}).as_object().unwrap().clone();
    driver.insert(&words(), Document::new(fields).unwrap()).unwrap();
    driver.insert(&words(), doc(json!({"name": "acht"}))).unwrap();

    // A fresh driver reads the collection back intact
    let reopened = Driver::new(
        "document",
        DriverConfig::new(dir.path().join("store").display().to_string()),
    )
    .unwrap();
    let snapshot = reopened.snapshot(&words()).unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|d| d.id().is_some() && d.get("_id").is_none()));
}

#[test]
fn test_invalid_collection_name_rejected() {
    let dir = TempDir::new().unwrap();
    let driver = Driver::new(
        "document",
        DriverConfig::new(dir.path().display().to_string()),
    )
    .unwrap();
    let err = driver
        .read(&CollectionKey::new("words", "../escape"))
        .err()
        .unwrap();
    assert!(matches!(err, DriverError::StoreOperation(_)));
}
