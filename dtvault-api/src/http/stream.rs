//! Video download endpoint
//!
//! `GET /stream?id=<videoId>[&preset=<presetId>]` relays the stored video,
//! transcoded through the named preset when one is given.

use axum::{
    extract::{Query, State},
    response::Response,
};
use dtvault_core::StreamRequest;
use serde::Deserialize;
use tracing::debug;

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub id: Option<String>,
    pub preset: Option<String>,
}

pub async fn stream_video(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> AppResult<Response> {
    let video_id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(AppError::missing_id)?;

    debug!(video_id = %video_id, preset = ?params.preset, "Stream requested");

    let pending = state
        .relay
        .open(StreamRequest::new(video_id, params.preset))
        .await?;

    Ok(pending.into_response().await)
}
