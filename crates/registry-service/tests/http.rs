//! Drives the router exactly as an HTTP client would, using `tower`'s
//! in-process `oneshot` rather than a bound socket.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{Request, StatusCode};
use axum::routing::RouterIntoService;
use http_body_util::BodyExt;
use registry_store::{Registry, DEFAULT_BLOCK_SIZE};
use tower::{Service, ServiceExt};

async fn test_app() -> (tempfile::TempDir, RouterIntoService<Body>) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::open(dir.path(), DEFAULT_BLOCK_SIZE).await.unwrap();
    let service = registry_service::gen_router(registry).into_service::<Body>();
    (dir, service)
}

async fn collect_body(body: Body) -> Vec<u8> {
    body.collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn base_reports_liveness() {
    let (_dir, mut service) = test_app().await;
    let app = service.ready().await.unwrap();

    let response = app
        .call(Request::builder().uri("/v2/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("Docker-Distribution-API-Version")
            .unwrap(),
        "registry/2.0"
    );
}

#[tokio::test]
async fn chunked_blob_upload_then_fetch_roundtrips() {
    let (_dir, mut service) = test_app().await;
    let app = service.ready().await.unwrap();

    let content = b"hello registry";
    let digest = registry_store::BlobDigest::of(content);

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/v2/library/sample/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let upload_location = response
        .headers()
        .get(LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    for chunk in content.chunks(4) {
        let response = app
            .call(
                Request::builder()
                    .method("PATCH")
                    .uri(&upload_location)
                    .body(Body::from(chunk.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let finalize_uri = format!("{upload_location}?digest={digest}");
    let response = app
        .call(
            Request::builder()
                .method("PUT")
                .uri(finalize_uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let get_uri = format!("/v2/library/sample/blobs/{digest}");
    let response = app
        .call(Request::builder().uri(get_uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("Content-Length").unwrap(),
        &content.len().to_string()
    );
    let body = collect_body(response.into_body()).await;
    assert_eq!(body, content);
}

#[tokio::test]
async fn finalize_with_mismatched_digest_returns_400() {
    let (_dir, mut service) = test_app().await;
    let app = service.ready().await.unwrap();

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/v2/library/sample/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let upload_location = response
        .headers()
        .get(LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    app.call(
        Request::builder()
            .method("PATCH")
            .uri(&upload_location)
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await
    .unwrap();

    let wrong_digest = format!("sha256:{}", "0".repeat(64));
    let response = app
        .call(
            Request::builder()
                .method("PUT")
                .uri(format!("{upload_location}?digest={wrong_digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = collect_body(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["errors"][0]["code"], "DIGEST_INVALID");
}

#[tokio::test]
async fn manifest_put_then_get_roundtrips() {
    let (_dir, mut service) = test_app().await;
    let app = service.ready().await.unwrap();

    async fn push_blob(
        app: &mut RouterIntoService<Body>,
        content: &'static [u8],
    ) -> registry_store::BlobDigest {
        let digest = registry_store::BlobDigest::of(content);
        let response = app
            .ready()
            .await
            .unwrap()
            .call(
                Request::builder()
                    .method("POST")
                    .uri("/v2/library/sample/blobs/uploads/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let upload_location = response
            .headers()
            .get(LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();

        app.ready()
            .await
            .unwrap()
            .call(
                Request::builder()
                    .method("PUT")
                    .uri(format!("{upload_location}?digest={digest}"))
                    .body(Body::from(content))
                    .unwrap(),
            )
            .await
            .unwrap();
        digest
    }

    let config_digest = push_blob(app, b"{}").await;
    let layer_digest = push_blob(app, b"layer-bytes").await;

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "config": {"digest": config_digest.to_string()},
        "layers": [{"digest": layer_digest.to_string()}],
    });
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();

    let response = app
        .ready()
        .await
        .unwrap()
        .call(
            Request::builder()
                .method("PUT")
                .uri("/v2/library/sample/manifests/latest")
                .header(
                    CONTENT_TYPE,
                    "application/vnd.docker.distribution.manifest.v2+json",
                )
                .body(Body::from(manifest_bytes.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .ready()
        .await
        .unwrap()
        .call(
            Request::builder()
                .uri("/v2/library/sample/manifests/latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/vnd.docker.distribution.manifest.v2+json"
    );
    let body = collect_body(response.into_body()).await;
    assert_eq!(body, manifest_bytes);
}
