use axum::{
    Json, Router,
    middleware,
    routing::{delete, get, post},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, bulk, generate, history, modernize, profile};

/// Full HTTP surface. Everything except health and the auth endpoints sits
/// behind the session gate.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/generate", post(generate::generate))
        .route("/bulk/import", post(bulk::import_store))
        .route("/bulk/modernize", post(modernize::create_job))
        .route("/bulk/modernize/{job_id}", get(modernize::get_job))
        .route("/profile", get(profile::get_profile).patch(profile::update_profile))
        .route("/generations", get(history::list_generations))
        .route("/generations/{generation_id}", delete(history::delete_generation))
        .route("/stats", get(history::stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
