use axum::{extract::State, Json};
use dtvault_core::Preset;

use super::{AppResult, AppState};

/// `GET /presets`: the encoder's preset catalog
pub async fn list_presets(State(state): State<AppState>) -> AppResult<Json<Vec<Preset>>> {
    let presets = state.upstreams.list_presets().await?;
    Ok(Json(presets))
}
