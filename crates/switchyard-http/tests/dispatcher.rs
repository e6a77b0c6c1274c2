//! Dispatcher tests against an in-memory store and a registry of unreachable
//! backends. Everything here exercises paths that never need a live backend:
//! capacity rejection, zero-copy copy, idempotent deletes, HEAD served from
//! object records, listings, and the multipart capacity abort.

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use switchyard_core::balancer::Balancer;
use switchyard_core::config::Config;
use switchyard_core::manager::ConfigManager;
use switchyard_core::metrics::Metrics;
use switchyard_core::reporter::{CounterStore, Reporter};
use switchyard_core::Registry;
use switchyard_http::router::RoutingContext;
use switchyard_http::Gateway;
use switchyard_model::{GatewayOperation, S3ErrorCode};
use switchyard_store::Store;

const CONFIG: &str = r#"
database:
  type: sqlite
  dsn: ":memory:"
buckets:
  - name: media
    virtual: true
  - name: pool-a
    endpoint: http://127.0.0.1:1
    access_key_id: AK
    secret_access_key: SK
    max_size: 10GB
    path_style: true
  - name: pool-b
    endpoint: http://127.0.0.1:1
    access_key_id: AK
    secret_access_key: SK
    max_size: 10GB
    path_style: true
balancer:
  strategy: least-space
  retry_attempts: 1
"#;

struct Fixture {
    gateway: Arc<Gateway>,
    store: Arc<Store>,
    registry: Arc<Registry>,
    _config_dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&path).expect("create config");
    file.write_all(CONFIG.as_bytes()).expect("write config");

    let config_manager = ConfigManager::new(&path).expect("config manager");
    let config: Arc<Config> = config_manager.current();

    let store = Arc::new(Store::connect(&config.database).await.expect("store"));
    let metrics = Arc::new(Metrics::new());
    let http = reqwest::Client::new();
    let registry = Arc::new(Registry::new(&config, http.clone()).expect("registry"));
    let counters: Arc<dyn CounterStore> = Arc::clone(&store) as Arc<dyn CounterStore>;
    let reporter = Arc::new(Reporter::new(
        Arc::clone(&registry),
        Arc::clone(&metrics),
        Some(counters),
    ));
    let balancer = Arc::new(
        Balancer::new(Arc::clone(&registry), &config.balancer, Some(Arc::clone(&metrics)))
            .expect("balancer"),
    );

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&registry),
        balancer,
        Arc::clone(&store),
        reporter,
        metrics,
        config_manager,
        http,
    ));

    Fixture {
        gateway,
        store,
        registry,
        _config_dir: dir,
    }
}

fn put_parts(uri: &str, content_length: i64) -> http::request::Parts {
    http::Request::builder()
        .method(http::Method::PUT)
        .uri(uri)
        .header(http::header::CONTENT_LENGTH, content_length)
        .body(())
        .expect("request")
        .into_parts()
        .0
}

fn copy_parts(uri: &str, source: &str) -> http::request::Parts {
    http::Request::builder()
        .method(http::Method::PUT)
        .uri(uri)
        .header("x-amz-copy-source", source)
        .body(())
        .expect("request")
        .into_parts()
        .0
}

fn ctx(operation: GatewayOperation, query: &[(&str, &str)]) -> RoutingContext {
    RoutingContext {
        bucket: Some("media".to_owned()),
        key: Some("big.dat".to_owned()),
        operation,
        query: query
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    }
}

#[tokio::test]
async fn test_should_reject_put_exceeding_all_backend_capacity() {
    let fx = fixture().await;

    // 6 GB payload against two 10 GB backends, one of which already holds
    // 5 GB: no candidate has room.
    fx.registry
        .get("pool-a")
        .expect("pool-a")
        .set_usage(5 << 30, 10);
    fx.registry
        .get("pool-b")
        .expect("pool-b")
        .set_usage(5 << 30, 10);

    let parts = put_parts("/media/huge.bin", 6_000_000_000);
    let err = fx
        .gateway
        .put_object(&parts, "media", "huge.bin", Bytes::new())
        .await
        .unwrap_err();

    assert_eq!(err.code, S3ErrorCode::InsufficientStorage);
    assert_eq!(err.status_code(), StatusCode::INSUFFICIENT_STORAGE);

    // No mapping row was created for the failed PUT.
    assert!(fx
        .store
        .get_mapping("media", "huge.bin")
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn test_should_reject_put_on_unknown_and_real_buckets() {
    let fx = fixture().await;

    let parts = put_parts("/nope/a.txt", 10);
    let err = fx
        .gateway
        .put_object(&parts, "nope", "a.txt", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, S3ErrorCode::NoSuchBucket);

    // Real backends are never client-addressable.
    let parts = put_parts("/pool-a/a.txt", 10);
    let err = fx
        .gateway
        .put_object(&parts, "pool-a", "a.txt", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, S3ErrorCode::NoSuchBucket);
}

#[tokio::test]
async fn test_should_copy_without_touching_backend_bytes() {
    let fx = fixture().await;

    // Seed: media/src lives on pool-a as "src".
    fx.store
        .create_mapping("media", "src", "pool-a", "src")
        .await
        .expect("seed mapping");
    fx.store
        .record_object("src", "pool-a", 1_048_576, None, "image/png", "\"e-src\"")
        .await
        .expect("seed object");

    let used_before = fx.registry.get("pool-a").expect("pool-a").used_bytes();

    let parts = copy_parts("/media/dst", "/media/src");
    let response = fx
        .gateway
        .copy_object(&parts, "media", "dst")
        .await
        .expect("copy");
    assert_eq!(response.status(), StatusCode::OK);

    // One new mapping pointing at the *same* real object; no bytes moved.
    let dst = fx
        .store
        .get_mapping("media", "dst")
        .await
        .expect("query")
        .expect("dst mapping");
    assert_eq!(dst.real_bucket, "pool-a");
    assert_eq!(dst.real_key, "src");
    assert_eq!(
        fx.store
            .count_mappings_to("pool-a", "src")
            .await
            .expect("count"),
        2
    );
    assert_eq!(
        fx.registry.get("pool-a").expect("pool-a").used_bytes(),
        used_before
    );

    // Deleting the source leaves the destination readable: the real object
    // still has a live reference, so no backend delete is issued.
    let response = fx
        .gateway
        .delete_object("media", "src")
        .await
        .expect("delete source");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let head = fx
        .gateway
        .head_object("media", "dst")
        .await
        .expect("head destination");
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(
        head.headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok()),
        Some("1048576")
    );
}

#[tokio::test]
async fn test_should_answer_delete_idempotently() {
    let fx = fixture().await;

    for _ in 0..2 {
        let response = fx
            .gateway
            .delete_object("media", "never-existed")
            .await
            .expect("delete");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn test_should_serve_head_from_object_records() {
    let fx = fixture().await;

    fx.store
        .create_mapping("media", "doc.pdf", "pool-a", "doc.pdf")
        .await
        .expect("mapping");
    fx.store
        .record_object("doc.pdf", "pool-a", 2048, None, "application/pdf", "\"e1\"")
        .await
        .expect("object");

    let response = fx
        .gateway
        .head_object("media", "doc.pdf")
        .await
        .expect("head");
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/pdf")
    );
    assert_eq!(
        headers.get(http::header::ETAG).and_then(|v| v.to_str().ok()),
        Some("\"e1\"")
    );
    assert!(headers.contains_key(http::header::LAST_MODIFIED));

    // Unknown key is a 404, still without backend traffic.
    let err = fx.gateway.head_object("media", "ghost").await.unwrap_err();
    assert_eq!(err.code, S3ErrorCode::NoSuchKey);
}

#[tokio::test]
async fn test_should_list_virtual_bucket_with_pagination() {
    let fx = fixture().await;

    for key in ["img/a.png", "img/b.png", "img/c.png", "other/readme"] {
        fx.store
            .create_mapping("media", key, "pool-a", key)
            .await
            .expect("mapping");
        fx.store
            .record_object(key, "pool-a", 100, None, "", "\"e\"")
            .await
            .expect("object");
    }

    let ctx = RoutingContext {
        bucket: Some("media".to_owned()),
        key: None,
        operation: GatewayOperation::ListObjects,
        query: vec![
            ("prefix".to_owned(), "img/".to_owned()),
            ("max-keys".to_owned(), "2".to_owned()),
        ],
    };

    let response = fx.gateway.list_objects(&ctx, "media").await.expect("list");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<Key>img/a.png</Key>"));
    assert!(body.contains("<Key>img/b.png</Key>"));
    assert!(!body.contains("<Key>img/c.png</Key>"));
    assert!(!body.contains("other/readme"));
    assert!(body.contains("<IsTruncated>true</IsTruncated>"));

    // Marker resumes after the given key.
    let ctx = RoutingContext {
        bucket: Some("media".to_owned()),
        key: None,
        operation: GatewayOperation::ListObjects,
        query: vec![("marker".to_owned(), "img/b.png".to_owned())],
    };
    let response = fx.gateway.list_objects(&ctx, "media").await.expect("list");
    let body = body_string(response).await;
    assert!(!body.contains("<Key>img/a.png</Key>"));
    assert!(body.contains("<Key>img/c.png</Key>"));
}

#[tokio::test]
async fn test_should_expose_only_virtual_buckets() {
    let fx = fixture().await;

    let response = fx.gateway.list_buckets().expect("list buckets");
    let body = body_string(response).await;
    assert!(body.contains("<Name>media</Name>"));
    assert!(!body.contains("pool-a"));
    assert!(!body.contains("pool-b"));

    // Bucket existence surface.
    assert_eq!(
        fx.gateway.head_bucket("media").expect("head").status(),
        StatusCode::OK
    );
    assert_eq!(
        fx.gateway.head_bucket("pool-a").expect("head").status(),
        StatusCode::NOT_FOUND
    );

    // A real backend's name is reserved.
    let err = fx.gateway.create_bucket("pool-a").unwrap_err();
    assert_eq!(err.code, S3ErrorCode::BucketAlreadyExists);
    // Creating the preconfigured virtual bucket is a no-op.
    assert_eq!(
        fx.gateway.create_bucket("media").expect("create").status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_should_abort_multipart_upload_on_capacity_overrun() {
    let fx = fixture().await;

    // Shrink pool-a to 10 MB and make it the only candidate.
    fx.registry
        .get("pool-b")
        .expect("pool-b")
        .set_health(false, chrono::Utc::now());
    let pool_a = fx.registry.get("pool-a").expect("pool-a");
    pool_a.set_usage((10_i64 << 30) - (10 << 20), 1); // 10 MB left

    // Session from initiate: mapping + session with 6 MB already uploaded.
    fx.store
        .create_mapping("media", "big.dat", "pool-a", "big.dat")
        .await
        .expect("mapping");
    fx.store
        .create_session("upload-1", "big.dat", "pool-a")
        .await
        .expect("session");
    fx.store
        .add_session_part("upload-1", 6 << 20)
        .await
        .expect("part 1 accounting");

    // Part 2 of 6 MB projects to 12 MB > 10 MB available.
    let parts = put_parts("/media/big.dat?uploadId=upload-1&partNumber=2", 6 << 20);
    let routing = ctx(
        GatewayOperation::UploadPart,
        &[("uploadId", "upload-1"), ("partNumber", "2")],
    );

    let err = fx
        .gateway
        .upload_part(&parts, &routing, "media", "big.dat", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, S3ErrorCode::EntityTooLarge);
    assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

    // The whole upload was aborted, not just the part.
    let session = fx
        .store
        .get_session("upload-1")
        .await
        .expect("query")
        .expect("session");
    assert_eq!(session.status, "aborted");
}

async fn body_string(response: http::Response<switchyard_http::GatewayBody>) -> String {
    use http_body_util::BodyExt;
    let collected = response.into_body().collect().await.expect("body");
    String::from_utf8(collected.to_bytes().to_vec()).expect("utf8")
}
