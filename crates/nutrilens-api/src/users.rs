use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use nutrilens_db::models::UserRow;
use nutrilens_types::api::{Claims, UpdateProfileRequest, UserDetail};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v1/user/me
pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserDetail>, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&id))
        .await
        .map_err(anyhow::Error::from)??
        .ok_or(ApiError::NotFound)?;

    Ok(Json(detail_from_row(user)?))
}

/// PUT /api/v1/user/{userId} — partial profile update, self only.
pub async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(changes): Json<UpdateProfileRequest>,
) -> Result<Json<UserDetail>, ApiError> {
    if claims.sub != user_id {
        return Err(ApiError::Forbidden);
    }

    if let Some(age) = changes.age {
        if !(0..=150).contains(&age) {
            return Err(ApiError::Validation("age is out of range".into()));
        }
    }

    let db = state.db.clone();
    let id = user_id.to_string();
    let user = tokio::task::spawn_blocking(move || db.update_user_profile(&id, &changes))
        .await
        .map_err(anyhow::Error::from)??
        .ok_or(ApiError::NotFound)?;

    Ok(Json(detail_from_row(user)?))
}

fn detail_from_row(row: UserRow) -> Result<UserDetail, ApiError> {
    let id: Uuid = row
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", row.id, e))?;
    Ok(UserDetail {
        id,
        email: row.email,
        username: row.username,
        age: row.age,
        gender: row.gender,
        height: row.height,
        weight: row.weight,
        calorie_goal: row.calorie_goal,
        special_diet: row.special_diet,
        cuisine: row.cuisine,
    })
}
