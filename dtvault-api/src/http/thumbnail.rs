//! `GET /thumbnail?id=<videoId>` renders a JPEG through the encoder.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use dtvault_core::ThumbnailBridge;
use serde::Deserialize;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ThumbnailParams {
    pub id: Option<String>,
}

pub async fn get_thumbnail(
    State(state): State<AppState>,
    Query(params): Query<ThumbnailParams>,
) -> AppResult<Response> {
    let video_id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(AppError::missing_id)?;

    let bridge = ThumbnailBridge::new(Arc::clone(&state.upstreams), state.thumbnail);
    // Stops the storage read if the client hangs up mid-generation
    let _cancel_on_drop = bridge.cancellation_token().drop_guard();

    let image = bridge.generate(&[video_id]).await?;
    if image.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], image).into_response())
}
