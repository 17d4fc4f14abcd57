use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::warn;
use uuid::Uuid;

use studio_db::models::ProfileRow;
use studio_types::api::{Claims, ProfileResponse, UpdateProfileRequest};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let uid = claims.sub.to_string();

    let profile = db_call(&state, move |db| db.get_profile(&uid))
        .await
        .map_err(ApiError::internal("Could not fetch user profile"))?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(to_response(profile)))
}

/// PATCH /profile — display name and username only; credits are never writable here.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let Json(req) = payload?;

    let full_name = req.full_name.map(|n| n.trim().to_string());
    let username = req.username.map(|u| u.trim().to_string());

    if let Some(username) = &username {
        if username.len() < 3 || username.len() > 32 {
            return Err(ApiError::BadRequest("Username must be 3 to 32 characters".into()));
        }
    }

    let uid = claims.sub.to_string();
    let updated = db_call(&state, move |db| {
        if let Some(username) = &username {
            if db.is_username_taken(username, &uid)? {
                return Ok(None);
            }
        }
        db.update_profile(&uid, full_name.as_deref(), username.as_deref())
            .map(Some)
    })
    .await
    .map_err(|e| {
        if studio_db::is_constraint_violation(&e) {
            ApiError::Conflict("Username already taken".into())
        } else {
            ApiError::internal("Failed to update profile")(e)
        }
    })?;

    match updated {
        None => Err(ApiError::Conflict("Username already taken".into())),
        Some(None) => Err(ApiError::NotFound),
        Some(Some(profile)) => Ok(Json(to_response(profile))),
    }
}

fn to_response(row: ProfileRow) -> ProfileResponse {
    ProfileResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt profile id '{}': {}", row.id, e);
            Uuid::default()
        }),
        email: row.email,
        full_name: row.full_name,
        username: row.username,
        credits: row.credits,
    }
}
