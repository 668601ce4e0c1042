//! Record Store and Blob Store contract tests
//!
//! Every backend must satisfy the same get/create/update and get/store
//! contract; the same checks run against each implementation.

use expense_common::blob::{BlobStore, FileSystemBlobStore, InMemoryBlobStore};
use expense_common::db::{
    InMemoryRecordStore, PostgresRecordStore, RecordStore, SqliteRecordStore,
};
use expense_common::models::{Record, Status};
use expense_common::Error;
use tempfile::TempDir;
use uuid::Uuid;

async fn sqlite_store(dir: &TempDir) -> SqliteRecordStore {
    SqliteRecordStore::open(&dir.path().join("records.db"))
        .await
        .unwrap()
}

async fn check_record_contract(store: &dyn RecordStore) {
    let mut record = Record::new("receipt.pdf", "application/pdf", ".pdf");

    // Unknown id
    assert!(matches!(store.get(record.id).await, Err(Error::NotFound(_))));
    assert!(matches!(store.update(&record).await, Err(Error::NotFound(_))));

    // Create then read back
    store.create(&record).await.unwrap();
    let loaded = store.get(record.id).await.unwrap();
    assert_eq!(loaded.id, record.id);
    assert_eq!(loaded.filename, "receipt.pdf");
    assert_eq!(loaded.status, Status::Pending);
    assert!(loaded.json_path.is_none());

    // Duplicate create
    assert!(matches!(store.create(&record).await, Err(Error::AlreadyExists(_))));

    // Update persists every mutable field
    record.json_path = Some(format!("{}.json", record.id));
    record.transition_to(Status::Failed);
    record.failure = Some("provider returned 500".to_string());
    store.update(&record).await.unwrap();

    let loaded = store.get(record.id).await.unwrap();
    assert_eq!(loaded.status, Status::Failed);
    assert_eq!(loaded.json_path, record.json_path);
    assert_eq!(loaded.failure.as_deref(), Some("provider returned 500"));
}

#[tokio::test]
async fn test_in_memory_record_store_contract() {
    let store = InMemoryRecordStore::new();
    check_record_contract(&store).await;
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_sqlite_record_store_contract() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    check_record_contract(&store).await;
}

#[tokio::test]
async fn test_sqlite_record_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let record = Record::new("scan.png", "image/png", ".png");

    {
        let store = sqlite_store(&dir).await;
        store.create(&record).await.unwrap();
    }

    let reopened = sqlite_store(&dir).await;
    let loaded = reopened.get(record.id).await.unwrap();
    assert_eq!(loaded.mime_type, "image/png");
    assert_eq!(loaded.path, record.path);
}

#[tokio::test]
async fn test_sqlite_concurrent_updates_last_writer_wins() {
    let dir = TempDir::new().unwrap();
    let store = std::sync::Arc::new(sqlite_store(&dir).await);
    let record = Record::new("scan.png", "image/png", ".png");
    store.create(&record).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let mut copy = record.clone();
        handles.push(tokio::spawn(async move {
            copy.failure = Some(format!("writer {}", i));
            store.update(&copy).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let loaded = store.get(record.id).await.unwrap();
    assert!(loaded.failure.unwrap().starts_with("writer "));
}

#[tokio::test]
#[ignore = "needs a PostgreSQL server at EXPENSE_TEST_DATABASE_URL"]
async fn test_postgres_record_store_contract() {
    let url = std::env::var("EXPENSE_TEST_DATABASE_URL").expect("EXPENSE_TEST_DATABASE_URL");
    let store = PostgresRecordStore::connect(url.parse().unwrap())
        .await
        .unwrap();
    check_record_contract(&store).await;
}

async fn check_blob_contract(store: &dyn BlobStore) {
    let name = format!("{}.json", Uuid::new_v4());

    assert!(matches!(store.get(&name).await, Err(Error::NotFound(_))));

    store.store(&name, b"{\"a\":1}").await.unwrap();
    assert_eq!(store.get(&name).await.unwrap(), b"{\"a\":1}");

    // Overwrite
    store.store(&name, b"{}").await.unwrap();
    assert_eq!(store.get(&name).await.unwrap(), b"{}");

    assert!(matches!(store.store("", b"x").await, Err(Error::InvalidInput(_))));
    assert!(store.store("../escape.json", b"x").await.is_err());
}

#[tokio::test]
async fn test_in_memory_blob_store_contract() {
    let store = InMemoryBlobStore::new();
    check_blob_contract(&store).await;
}

#[tokio::test]
async fn test_filesystem_blob_store_contract() {
    let dir = TempDir::new().unwrap();
    let store = FileSystemBlobStore::open(dir.path().join("blobs")).await.unwrap();
    check_blob_contract(&store).await;
}

#[tokio::test]
async fn test_public_url_requires_base() {
    let dir = TempDir::new().unwrap();
    let store = FileSystemBlobStore::open(dir.path()).await.unwrap();
    assert!(matches!(store.public_url("a.pdf"), Err(Error::Unsupported(_))));

    let store = store.with_public_base_url("https://files.example.com/receipts/");
    assert_eq!(
        store.public_url("a.pdf").unwrap(),
        "https://files.example.com/receipts/a.pdf"
    );

    let memory = InMemoryBlobStore::new();
    assert!(memory.public_url("a.pdf").is_err());
    let memory = memory.with_public_base_url("http://localhost:9000");
    assert_eq!(memory.public_url("a.pdf").unwrap(), "http://localhost:9000/a.pdf");
}
