use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use studio_types::api::{Claims, GenerationResponse, StatsResponse};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /generations — the caller's generations, newest first.
pub async fn list_generations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<GenerationResponse>>, ApiError> {
    let Query(query) = query?;
    let uid = claims.sub.to_string();
    let limit = query.limit.clamp(1, 200);

    let rows = db_call(&state, move |db| db.list_generations(&uid, limit))
        .await
        .map_err(ApiError::internal("Failed to load history"))?;

    let generations = rows
        .into_iter()
        .map(|row| GenerationResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt generation id '{}': {}", row.id, e);
                Uuid::default()
            }),
            result_urls: serde_json::from_str(&row.result_urls).unwrap_or_else(|e| {
                warn!("Corrupt result_urls on generation '{}': {}", row.id, e);
                Vec::new()
            }),
            created_at: parse_db_timestamp(&row.created_at),
            product_id: row.product_id,
            prompt: row.prompt,
            source_image_url: row.source_image_url,
        })
        .collect();

    Ok(Json(generations))
}

/// DELETE /generations/{id} — owners only; anyone else gets 404.
pub async fn delete_generation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    generation_id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(generation_id) = generation_id?;
    let (gid, uid) = (generation_id.to_string(), claims.sub.to_string());

    let deleted = db_call(&state, move |db| db.delete_generation(&gid, &uid))
        .await
        .map_err(ApiError::internal("Failed to delete generation"))?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

/// GET /stats — dashboard counters.
pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StatsResponse>, ApiError> {
    let uid = claims.sub.to_string();

    let (total_generations, profile) = db_call(&state, move |db| {
        Ok((db.count_generations(&uid)?, db.get_profile(&uid)?))
    })
    .await
    .map_err(ApiError::internal("Failed to load stats"))?;

    let profile = profile.ok_or_else(|| ApiError::Internal("Could not fetch user profile".into()))?;

    Ok(Json(StatsResponse {
        total_generations,
        credits: profile.credits,
    }))
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC; fall back to the epoch on corrupt values.
pub(crate) fn parse_db_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn sqlite_timestamps_parse_as_utc() {
        let ts = parse_db_timestamp("2026-03-04 05:06:07");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2026, 3, 4));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (5, 6, 7));
    }

    #[test]
    fn garbage_falls_back_to_epoch() {
        assert_eq!(parse_db_timestamp("yesterday"), DateTime::<Utc>::default());
    }
}
