use axum::{
    Extension, Json,
    extract::{Multipart, State},
};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use nutrilens_storage::ObjectStore;
use nutrilens_types::api::{Claims, VisionAnalyzeResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/v1/vision/analyze — multipart field `image`. Stores the photo,
/// records its metadata, and proxies the analysis to the AI gateway.
pub async fn analyze(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<VisionAnalyzeResponse>, ApiError> {
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some("image") {
            let filename = field.file_name().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("unreadable image field: {}", e)))?;
            upload = Some((filename, bytes.to_vec()));
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::Validation("image file is required".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("image file is empty".into()));
    }

    // The token may outlive the account
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&uid))
        .await
        .map_err(anyhow::Error::from)??
        .ok_or(ApiError::NotFound)?;

    let key = ObjectStore::unique_key(filename.as_deref());
    state.storage.put(&key, &bytes).await.map_err(|e| {
        error!("Image upload to object store failed: {:#}", e);
        ApiError::UpstreamUnavailable
    })?;

    let image_id = Uuid::new_v4().to_string();
    let db = state.db.clone();
    let (iid, owner, bucket, object_key) = (
        image_id.clone(),
        user.id.clone(),
        state.storage.bucket().to_string(),
        key.clone(),
    );
    let now = Utc::now().to_rfc3339();
    tokio::task::spawn_blocking(move || {
        db.insert_image(&iid, Some(&owner), &bucket, &object_key, &now)
    })
    .await
    .map_err(anyhow::Error::from)??;

    info!("Analyzing image {} (object {}) for user {}", image_id, key, user.id);
    let prediction = state.gateway.predict_image(&user.id, &image_id).await?;
    Ok(Json(prediction))
}
