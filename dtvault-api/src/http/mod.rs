// Module: http
// Plain HTTP endpoints of the back-end-for-front-end

pub mod error;
pub mod health;
pub mod presets;
pub mod stream;
pub mod thumbnail;

use std::sync::Arc;

use axum::{routing::get, Router};
use dtvault_core::{StreamRelay, ThumbnailSpec, Upstreams};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub upstreams: Arc<Upstreams>,
    pub relay: StreamRelay,
    pub thumbnail: ThumbnailSpec,
}

impl AppState {
    pub fn new(upstreams: Arc<Upstreams>, thumbnail: ThumbnailSpec) -> Self {
        Self {
            relay: StreamRelay::new(Arc::clone(&upstreams)),
            upstreams,
            thumbnail,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Only GET streams; any other method is answered like an unknown path.
        // HEAD needs its own entry or it is served by the GET handler
        .route(
            "/stream",
            get(stream::stream_video)
                .head(error::not_found)
                .fallback(error::not_found),
        )
        .route("/thumbnail", get(thumbnail::get_thumbnail))
        .route("/presets", get(presets::list_presets))
        .merge(health::create_health_router())
        .fallback(error::not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
