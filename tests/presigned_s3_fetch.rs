use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use s3_facade::{collect_stream, ObjectStorage, S3Backend, StorageError};

fn storage_for(endpoint: &str) -> ObjectStorage<S3Backend> {
    let conf = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .endpoint_url(endpoint)
        .force_path_style(true)
        .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
        .build();
    let backend = S3Backend::from_client(
        aws_sdk_s3::Client::from_conf(conf),
        Some("us-east-1".to_string()),
    );
    ObjectStorage::with_backend(backend).unwrap()
}

#[tokio::test]
async fn long_lived_url_returns_the_exact_bytes() {
    let mut server = mockito::Server::new_async().await;
    let content: &[u8] = b"\x00\x01binary\xffpayload";
    let mock = server
        .mock("GET", "/reports/File02.txt")
        .match_query(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("X-Amz-Expires".into(), "1800".into()),
            mockito::Matcher::Regex("X-Amz-Signature=".into()),
        ]))
        .with_status(200)
        .with_body(content)
        .create_async()
        .await;

    let store = storage_for(&server.url());
    let url = store.presigned_url("reports", "File02.txt", 30).await.unwrap();
    let body = collect_stream(store.fetch_presigned_url_data(&url).await.unwrap())
        .await
        .unwrap();

    assert_eq!(&body[..], content);
    mock.assert_async().await;
}

#[tokio::test]
async fn zero_minute_url_is_refused() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/reports/File02.txt")
        .match_query(mockito::Matcher::UrlEncoded(
            "X-Amz-Expires".into(),
            "0".into(),
        ))
        .with_status(403)
        .with_body("<Error><Code>AccessDenied</Code><Message>Request has expired</Message></Error>")
        .create_async()
        .await;

    let store = storage_for(&server.url());
    let url = store.presigned_url("reports", "File02.txt", 0).await.unwrap();
    let err = store.fetch_presigned_url_data(&url).await.err().unwrap();

    match err {
        StorageError::Provider { code, message } => {
            assert_eq!(code.as_deref(), Some("403"));
            assert!(message.contains("Request has expired"));
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
}
