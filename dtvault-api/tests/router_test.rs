// HTTP router tests against in-process storage and encoder services

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use bytes::Bytes;
use dtvault_api::{create_router, AppState};
use dtvault_core::test_helpers::{
    spawn_upstreams, test_preset, MockEncoder, MockStorage, StorageEnding, StoredVideo,
};
use dtvault_core::{GrpcAddress, ThumbnailSpec, Upstreams};
use tower::ServiceExt;

async fn router_with(storage: MockStorage, encoder: MockEncoder) -> Router {
    let upstreams = spawn_upstreams(storage, encoder).await.unwrap();
    create_router(AppState::new(upstreams, ThumbnailSpec::default()))
}

async fn default_router() -> Router {
    let storage = MockStorage::new().with_video(
        StoredVideo::new("a")
            .with_mime_type("video/mp4")
            .with_file_name("a.mp4")
            .with_chunks(&[b"abcdef", b"ghijkl"]),
    );
    let encoder = MockEncoder::new().with_presets(vec![test_preset("a"), test_preset("b")]);
    router_with(storage, encoder).await
}

async fn send(router: Router, method: Method, uri: &str) -> Response {
    router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(router: Router, uri: &str) -> Response {
    send(router, Method::GET, uri).await
}

async fn body_of(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

#[tokio::test]
async fn test_stream_passthrough() {
    let response = get(default_router().await, "/stream?id=a").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=a.mp4"
    );
    assert_eq!(body_of(response).await, Bytes::from_static(b"abcdefghijkl"));
}

#[tokio::test]
async fn test_stream_transcoded() {
    let response = get(default_router().await, "/stream?id=a&preset=b").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    assert_eq!(body_of(response).await, Bytes::from_static(b"ABCDEFGHIJKL"));
}

#[tokio::test]
async fn test_stream_missing_id() {
    for uri in ["/stream", "/stream?id=", "/stream?preset=a"] {
        let response = get(default_router().await, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_of(response).await, Bytes::from_static(b"Missing id\n"));
    }
}

#[tokio::test]
async fn test_stream_unknown_preset() {
    let response = get(default_router().await, "/stream?id=a&preset=c").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_of(response).await,
        Bytes::from_static(b"Preset 'c' not found\n")
    );
}

#[tokio::test]
async fn test_stream_storage_failure() {
    let storage = MockStorage::new().with_video(
        StoredVideo::new("broken").ending(StorageEnding::Error("disk failure".to_string())),
    );
    let router = router_with(storage, MockEncoder::new()).await;

    let response = get(router.clone(), "/stream?id=broken").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_of(response).await, Bytes::from_static(b"Internal error\n"));

    let response = get(router, "/stream?id=unknown").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_of(response).await, Bytes::from_static(b"Internal error\n"));
}

#[tokio::test]
async fn test_stream_rejects_other_methods() {
    let response = send(default_router().await, Method::POST, "/stream?id=a").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_of(response).await, Bytes::from_static(b"Not found\n"));
}

#[tokio::test]
async fn test_stream_head_does_not_open_storage() {
    let storage = MockStorage::new().with_video(
        StoredVideo::new("live")
            .with_chunks(&[b"first"])
            .ending(StorageEnding::Stall),
    );
    let router = router_with(storage.clone(), MockEncoder::new()).await;

    let response = send(router, Method::HEAD, "/stream?id=live").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(storage.open_streams(), 0);
}

#[tokio::test]
async fn test_unreachable_upstreams() {
    let dead: GrpcAddress = "http://127.0.0.1:1".parse().unwrap();
    let upstreams = Arc::new(Upstreams::new(dead.clone(), dead));
    let router = create_router(AppState::new(upstreams, ThumbnailSpec::default()));

    let response = get(router.clone(), "/stream?id=a").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = get(router, "/presets").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_of(response).await, Bytes::from_static(b"Internal error\n"));
}

#[tokio::test]
async fn test_presets_json() {
    let response = get(default_router().await, "/presets").await;

    assert_eq!(response.status(), StatusCode::OK);
    let presets: serde_json::Value = serde_json::from_slice(&body_of(response).await).unwrap();
    assert_eq!(presets.as_array().unwrap().len(), 2);
    assert_eq!(presets[0]["presetId"], "a");
    assert_eq!(presets[1]["title"], "b preset");
    assert!(presets[1]["command"].as_str().unwrap().contains("-preset b"));
}

#[tokio::test]
async fn test_thumbnail_jpeg() {
    let encoder = MockEncoder::new().with_thumbnail(b"\xff\xd8thumb\xff\xd9");
    let storage = MockStorage::new().with_video(StoredVideo::new("a").with_chunks(&[b"video"]));
    let router = router_with(storage, encoder.clone()).await;

    let response = get(router, "/thumbnail?id=a").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(body_of(response).await, encoder.thumbnail_image());
}

#[tokio::test]
async fn test_thumbnail_empty_is_no_content() {
    let encoder = MockEncoder::new().with_thumbnail(b"");
    let storage = MockStorage::new().with_video(StoredVideo::new("a").with_chunks(&[b"video"]));
    let router = router_with(storage, encoder).await;

    let response = get(router, "/thumbnail?id=a").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_thumbnail_errors() {
    let router = default_router().await;

    let response = get(router.clone(), "/thumbnail").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(router, "/thumbnail?id=unknown").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_and_unknown_path() {
    let router = default_router().await;

    let response = get(router.clone(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_of(response).await, Bytes::from_static(b"OK"));

    let response = get(router, "/graphql").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
