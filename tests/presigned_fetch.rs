use s3_facade::{collect_stream, MemoryBackend, ObjectStorage, StorageError};
use url::Url;

fn storage() -> ObjectStorage<MemoryBackend> {
    ObjectStorage::with_backend(MemoryBackend::new()).unwrap()
}

#[tokio::test]
async fn fetch_returns_body_of_a_valid_url() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/my-bucket/File02.txt")
        .match_query(mockito::Matcher::UrlEncoded(
            "X-Amz-Expires".into(),
            "1800".into(),
        ))
        .with_status(200)
        .with_body("original bytes")
        .create_async()
        .await;

    let url = Url::parse(&format!(
        "{}/my-bucket/File02.txt?X-Amz-Expires=1800&X-Amz-Signature=abc",
        server.url()
    ))
    .unwrap();
    let stream = storage().fetch_presigned_url_data(&url).await.unwrap();
    let body = collect_stream(stream).await.unwrap();

    assert_eq!(&body[..], b"original bytes");
    mock.assert_async().await;
}

#[tokio::test]
async fn fetch_of_an_expired_url_is_a_provider_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/my-bucket/File02.txt")
        .match_query(mockito::Matcher::UrlEncoded(
            "X-Amz-Expires".into(),
            "0".into(),
        ))
        .with_status(403)
        .with_body("<Error><Code>AccessDenied</Code><Message>Request has expired</Message></Error>")
        .create_async()
        .await;

    let url = Url::parse(&format!(
        "{}/my-bucket/File02.txt?X-Amz-Expires=0",
        server.url()
    ))
    .unwrap();
    let err = storage().fetch_presigned_url_data(&url).await.err().unwrap();

    match err {
        StorageError::Provider { code, message } => {
            assert_eq!(code.as_deref(), Some("403"));
            assert!(message.contains("Request has expired"));
        }
        other => panic!("unexpected error: {other}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn fetch_of_an_empty_error_body_reports_the_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/gone")
        .with_status(404)
        .create_async()
        .await;

    let url = Url::parse(&format!("{}/gone", server.url())).unwrap();
    let err = storage().fetch_presigned_url_data(&url).await.err().unwrap();
    assert!(matches!(
        err,
        StorageError::Provider { code: Some(ref c), .. } if c == "404"
    ));
}
