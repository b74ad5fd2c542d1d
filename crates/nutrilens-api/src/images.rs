use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v1/images/{filename} — streams the stored photo bytes.
pub async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state
        .storage
        .get(&filename)
        .await
        .map_err(|e| {
            warn!("Rejected image fetch for '{}': {:#}", filename, e);
            ApiError::NotFound
        })?
        .ok_or(ApiError::NotFound)?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}
