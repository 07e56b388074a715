//! Integration tests for the registry HTTP API.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use bytes::Bytes;
use registry::{Digest, RegistryBuilder};
use serde_json::{Value, json};
use storage::MemoryStorage;
use tower::ServiceExt;

/// Helper to create a test registry.
fn test_registry() -> axum::Router {
    let storage = MemoryStorage::with_buckets(&["test-registry"]);
    RegistryBuilder::new(storage.into())
        .bucket("test-registry")
        .build()
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: impl Into<Body>) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn error_code(response: Response<Body>) -> String {
    let error: Value = serde_json::from_slice(&body(response).await).unwrap();
    error["errors"][0]["code"].as_str().unwrap().to_owned()
}

fn header_str<'r>(response: &'r Response<Body>, name: &str) -> &'r str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

/// Push a blob in a single request.
async fn push_blob(app: &axum::Router, repository: &str, data: &'static [u8]) -> Digest {
    let digest = Digest::of(data);
    let response = send(
        app,
        "POST",
        &format!("/v2/{repository}/blobs/uploads/?digest={digest}"),
        Bytes::from_static(data),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    digest
}

fn image_manifest(config: &Digest, layers: &[&Digest]) -> Vec<u8> {
    let layers: Vec<_> = layers
        .iter()
        .map(|digest| {
            json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 1,
                "digest": digest,
            })
        })
        .collect();

    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 2,
            "digest": config,
        },
        "layers": layers,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_api_version_check() {
    let app = test_registry();

    let response = send(&app, "GET", "/v2/", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
}

#[tokio::test]
async fn test_chunked_upload() {
    let app = test_registry();
    let data = b"Hello, Registry!";
    let digest = Digest::of(data);

    // Start blob upload
    let response = send(&app, "POST", "/v2/test-repo/blobs/uploads/", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-0");
    let upload_url = header_str(&response, "location").to_owned();
    let id = header_str(&response, "docker-upload-uuid").to_owned();
    assert!(upload_url.ends_with(&id));

    // Send the data
    let response = send(&app, "PATCH", &upload_url, Bytes::from_static(data)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-15");

    let response = send(&app, "GET", &upload_url, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "range"), "0-15");

    // Complete without a final chunk
    let response = send(&app, "PUT", &format!("{upload_url}?digest={digest}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/test-repo/blobs/{digest}")
    );

    // The session is gone
    let response = send(&app, "GET", &upload_url, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UPLOAD_UNKNOWN");

    // Download blob
    let response = send(&app, "GET", &format!("/v2/test-repo/blobs/{digest}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), digest.to_string());
    assert_eq!(&body(response).await[..], data);
}

#[tokio::test]
async fn test_monolithic_put() {
    let app = test_registry();
    let data = b"test blob data";
    let digest = Digest::of(data);

    let response = send(&app, "POST", "/v2/test-repo/blobs/uploads/", Body::empty()).await;
    let upload_url = header_str(&response, "location").to_owned();

    let response = send(
        &app,
        "PUT",
        &format!("{upload_url}?digest={digest}"),
        Bytes::from_static(data),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Check blob exists with HEAD
    let response = send(&app, "HEAD", &format!("/v2/test-repo/blobs/{digest}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-length"), "14");
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_upload_digest_mismatch_keeps_session() {
    let app = test_registry();
    let wrong = Digest::of(b"something else");

    let response = send(&app, "POST", "/v2/test-repo/blobs/uploads/", Body::empty()).await;
    let upload_url = header_str(&response, "location").to_owned();

    let response = send(&app, "PATCH", &upload_url, Bytes::from_static(b"data")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, "PUT", &format!("{upload_url}?digest={wrong}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");

    let response = send(&app, "GET", &upload_url, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "range"), "0-3");

    let response = send(&app, "PUT", &upload_url, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");
}

#[tokio::test]
async fn test_second_chunk_is_unsupported() {
    let app = test_registry();

    let response = send(&app, "POST", "/v2/test-repo/blobs/uploads/", Body::empty()).await;
    let upload_url = header_str(&response, "location").to_owned();

    send(&app, "PATCH", &upload_url, Bytes::from_static(b"one")).await;
    let response = send(&app, "PATCH", &upload_url, Bytes::from_static(b"two")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_code(response).await, "UNSUPPORTED");
}

#[tokio::test]
async fn test_cancel_upload() {
    let app = test_registry();

    let response = send(&app, "POST", "/v2/test-repo/blobs/uploads/", Body::empty()).await;
    let upload_url = header_str(&response, "location").to_owned();

    let response = send(&app, "DELETE", &upload_url, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, "PATCH", &upload_url, Bytes::from_static(b"late")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mount_from_other_repository() {
    let app = test_registry();
    let digest = push_blob(&app, "library/source", b"shared layer").await;

    let response = send(
        &app,
        "POST",
        &format!("/v2/library/target/blobs/uploads/?mount={digest}&from=library/source"),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/library/target/blobs/{digest}")
    );

    // A missing mount source starts a regular upload
    let missing = Digest::of(b"missing");
    let response = send(
        &app,
        "POST",
        &format!("/v2/library/target/blobs/uploads/?mount={missing}&from=library/source"),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_manifest_upload_and_download() {
    let app = test_registry();
    let config = push_blob(&app, "test-repo", b"{}").await;
    let layer = push_blob(&app, "test-repo", b"layer").await;
    let manifest_bytes = image_manifest(&config, &[&layer]);

    // Upload manifest
    let response = send(
        &app,
        "PUT",
        "/v2/test-repo/manifests/latest",
        manifest_bytes.clone(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let digest = header_str(&response, "docker-content-digest").to_owned();
    assert_eq!(digest, Digest::of(&manifest_bytes).to_string());
    assert_eq!(
        header_str(&response, "location"),
        format!("/v2/test-repo/manifests/{digest}")
    );

    // Download manifest by tag
    let response = send(&app, "GET", "/v2/test-repo/manifests/latest", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "content-type"),
        "application/vnd.docker.distribution.manifest.v2+json"
    );
    assert_eq!(&body(response).await[..], &manifest_bytes[..]);

    // Download manifest by digest
    let response = send(&app, "GET", &format!("/v2/test-repo/manifests/{digest}"), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body(response).await[..], &manifest_bytes[..]);

    // Headers only
    let response = send(&app, "HEAD", "/v2/test-repo/manifests/latest", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_manifest_with_unknown_blob() {
    let app = test_registry();
    let config = push_blob(&app, "test-repo", b"{}").await;
    let missing = Digest::of(b"never pushed");

    let response = send(
        &app,
        "PUT",
        "/v2/test-repo/manifests/latest",
        image_manifest(&config, &[&missing]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "MANIFEST_BLOB_UNKNOWN");

    let response = send(&app, "GET", "/v2/test-repo/manifests/latest", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_tags() {
    let app = test_registry();
    let config = push_blob(&app, "library/test-repo", b"{}").await;
    let manifest_bytes = image_manifest(&config, &[]);

    for tag in ["v1.0", "v1.1", "latest"] {
        let response = send(
            &app,
            "PUT",
            &format!("/v2/library/test-repo/manifests/{tag}"),
            manifest_bytes.clone(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    // List tags
    let response = send(&app, "GET", "/v2/library/test-repo/tags/list", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::LINK).is_none());
    let tag_list: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(
        tag_list,
        json!({"name": "library/test-repo", "tags": ["latest", "v1.0", "v1.1"]})
    );

    // First page
    let response = send(&app, "GET", "/v2/library/test-repo/tags/list?n=2", Body::empty()).await;
    assert_eq!(
        header_str(&response, "link"),
        "</v2/library/test-repo/tags/list?n=2&last=v1.0>; rel=\"next\""
    );
    let tag_list: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(tag_list["tags"], json!(["latest", "v1.0"]));

    // Next page
    let response = send(
        &app,
        "GET",
        "/v2/library/test-repo/tags/list?n=2&last=v1.0",
        Body::empty(),
    )
    .await;
    let tag_list: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(tag_list["tags"], json!(["v1.1"]));
}

#[tokio::test]
async fn test_catalog() {
    let app = test_registry();
    let config = push_blob(&app, "any", b"{}").await;
    let manifest_bytes = image_manifest(&config, &[]);

    for repository in ["test", "bar", "my-alpine", "busybox"] {
        send(
            &app,
            "PUT",
            &format!("/v2/{repository}/manifests/latest"),
            manifest_bytes.clone(),
        )
        .await;
    }

    let response = send(&app, "GET", "/v2/_catalog", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let catalog: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(
        catalog,
        json!({"repositories": ["bar", "busybox", "my-alpine", "test"]})
    );

    let response = send(&app, "GET", "/v2/_catalog?last=busybox", Body::empty()).await;
    let catalog: Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(catalog["repositories"], json!(["my-alpine", "test"]));
}

#[tokio::test]
async fn test_blob_not_found() {
    let app = test_registry();
    let digest = Digest::of(b"nonexistent");

    let response = send(&app, "GET", &format!("/v2/test-repo/blobs/{digest}"), Body::empty()).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_manifest_not_found() {
    let app = test_registry();

    let response = send(&app, "GET", "/v2/test-repo/manifests/nonexistent", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");
}

#[tokio::test]
async fn test_invalid_digest() {
    let app = test_registry();

    let response = send(&app, "GET", "/v2/test-repo/blobs/sha256:nonexistent", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");
}

#[tokio::test]
async fn test_invalid_name() {
    let app = test_registry();

    let response = send(&app, "GET", "/v2/Test-Repo/tags/list", Body::empty()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "NAME_INVALID");
}

#[tokio::test]
async fn test_unknown_endpoint() {
    let app = test_registry();

    let response = send(&app, "GET", "/v2/test-repo/nothing-here", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "DELETE", "/v2/test-repo/manifests/latest", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
