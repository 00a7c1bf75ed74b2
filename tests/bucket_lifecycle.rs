use std::collections::HashMap;

use bytes::Bytes;
use s3_facade::{MemoryBackend, MemoryOp, ObjectStorage, StorageError};

#[tokio::test]
async fn full_bucket_lifecycle() {
    let store = ObjectStorage::with_backend(MemoryBackend::with_page_size(2)).unwrap();

    store.create_bucket("hrms-docs").await.unwrap();
    store
        .put_object("hrms-docs", "File01.txt", Bytes::from_static(b"one"))
        .await
        .unwrap();
    let metadata = HashMap::from([
        ("Project".to_string(), "HRMS".to_string()),
        ("Owner".to_string(), "Ahmad".to_string()),
    ]);
    store
        .put_object_with_metadata("hrms-docs", "File02.txt", b"two".to_vec(), metadata)
        .await
        .unwrap();
    store
        .put_object("hrms-docs", "File03.txt", Bytes::from_static(b"three"))
        .await
        .unwrap();

    let keys: Vec<String> = store
        .list_objects("hrms-docs")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.key)
        .collect();
    assert_eq!(keys, ["File01.txt", "File02.txt", "File03.txt"]);

    store
        .update_metadata(
            "hrms-docs",
            "File01.txt",
            HashMap::from([("Project".to_string(), "CRM".to_string())]),
        )
        .await
        .unwrap();
    let object = store.get_object("hrms-docs", "File01.txt").await.unwrap();
    assert_eq!(object.metadata.len(), 1);
    assert_eq!(object.metadata["Project"], "CRM");

    let urls = store
        .presigned_urls("hrms-docs", ["File01.txt", "File02.txt"], 30)
        .await;
    for (key, url) in &urls {
        let url = url.as_ref().unwrap();
        let bytes = store.backend().open_presigned(url).await.unwrap();
        let expected = store
            .get_object("hrms-docs", key)
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap();
        assert_eq!(bytes, expected);
    }

    assert_eq!(store.delete_bucket("hrms-docs").await.unwrap(), 3);
    assert!(store.list_buckets().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_stops_at_first_failure() {
    let store = ObjectStorage::with_backend(MemoryBackend::with_page_size(10)).unwrap();
    store.create_bucket("b").await.unwrap();
    for key in ["a", "b", "c"] {
        store
            .put_object("b", key, Bytes::from_static(b"x"))
            .await
            .unwrap();
    }
    store
        .backend()
        .fail_next(
            MemoryOp::DeleteObject,
            StorageError::Provider {
                code: Some("AccessDenied".into()),
                message: "Access Denied".into(),
            },
        )
        .await;

    let err = store.delete_bucket("b").await.unwrap_err();
    assert!(matches!(err, StorageError::Provider { .. }));
    // the first delete failed and nothing after it ran
    assert_eq!(store.backend().object_count("b").await, Some(3));
}
