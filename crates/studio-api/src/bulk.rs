use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::info;

use studio_providers::ScrapeRequest;
use studio_types::api::{BulkImportRequest, BulkImportResponse, Claims};

use crate::error::ApiError;
use crate::state::AppState;

/// Items fetched per import. Fixed; not a request parameter.
pub const MAX_IMPORT_ITEMS: u32 = 20;

const LISTING_PATH: &str = "collections/all";

/// Point a storefront base URL at its full catalog listing.
pub fn normalize_store_url(store_url: &str) -> String {
    let store_url = store_url.trim();
    if store_url.ends_with('/') {
        format!("{}{}", store_url, LISTING_PATH)
    } else {
        format!("{}/{}", store_url, LISTING_PATH)
    }
}

/// POST /bulk/import — scrape a storefront's catalog and hand back the raw items.
///
/// Not credit gated. Nothing is persisted.
pub async fn import_store(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<BulkImportRequest>, JsonRejection>,
) -> Result<Json<BulkImportResponse>, ApiError> {
    let Json(req) = payload?;
    let store_url = req
        .store_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Store URL is required".into()))?;

    let request = ScrapeRequest {
        start_url: normalize_store_url(&store_url),
        max_items: MAX_IMPORT_ITEMS,
        use_proxy: true,
    };
    info!("User {} importing {}", claims.sub, request.start_url);

    let outcome = state
        .scraper
        .scrape(&request)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(BulkImportResponse {
        success: true,
        products: outcome.items,
        run_id: outcome.run_id,
    }))
}
