use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use studio_db::models::GenerationRow;
use studio_providers::{SamplingParams, SynthesisRequest};
use studio_types::api::{Claims, GenerateRequest, GenerateResponse};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

/// Prompt used for every item of a bulk modernize job.
pub const BULK_PROMPT: &str = "professional studio product photography, minimal marble background, soft natural lighting, high resolution, extremely detailed";

/// Wrap the seller's scene description in the studio photography template.
pub fn studio_prompt(scene: &str) -> String {
    format!(
        "Professional product photography, {}, 8k, highly detailed, studio lighting, advertising style",
        scene
    )
}

/// Outcome of one credit-gated generation.
#[derive(Debug)]
pub struct Generated {
    pub result: Vec<String>,
    pub remaining_credits: i64,
}

/// POST /generate — re-stage a product photo for one credit.
pub async fn generate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(req) = payload?;
    let input = GenerationInput::validate(req)?;

    let generated = generate_for_user(
        &state,
        claims.sub,
        &input.image_url,
        &input.prompt,
        input.product_id.as_deref(),
    )
    .await?;

    Ok(Json(GenerateResponse {
        result: generated.result,
        remaining_credits: generated.remaining_credits,
    }))
}

#[derive(Debug, PartialEq)]
struct GenerationInput {
    image_url: String,
    prompt: String,
    product_id: Option<String>,
}

impl GenerationInput {
    fn validate(req: GenerateRequest) -> Result<Self, ApiError> {
        let image_url = req.image_url.unwrap_or_default().trim().to_string();
        let prompt = req.prompt.unwrap_or_default().trim().to_string();

        if image_url.is_empty() || prompt.is_empty() {
            return Err(ApiError::BadRequest(
                "Missing required fields: imageUrl and prompt".into(),
            ));
        }

        match Url::parse(&image_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(ApiError::BadRequest("imageUrl must be an http(s) URL".into())),
        }

        let product_id = req.product_id.filter(|p| !p.trim().is_empty());

        Ok(Self {
            image_url,
            prompt,
            product_id,
        })
    }
}

/// Check the balance, synthesize, then debit one credit.
///
/// The synthesis service is never called when the balance is below one. The
/// debit is a conditional update that cannot overdraw; if it does not land
/// (store error, or a concurrent request spent the last credit) the result
/// is still delivered and the miss is logged.
pub async fn generate_for_user(
    state: &AppState,
    user_id: Uuid,
    image_url: &str,
    prompt: &str,
    product_id: Option<&str>,
) -> Result<Generated, ApiError> {
    let uid = user_id.to_string();

    // 1. Check credits
    let lookup = uid.clone();
    let profile = db_call(state, move |db| db.get_profile(&lookup))
        .await
        .map_err(|e| {
            error!("Profile load for {} failed: {}", user_id, e);
            ApiError::Internal("Could not fetch user profile".into())
        })?
        .ok_or_else(|| ApiError::Internal("Could not fetch user profile".into()))?;

    if profile.credits < 1 {
        return Err(ApiError::InsufficientCredits);
    }

    // 2. Synthesize
    let request = SynthesisRequest {
        prompt: studio_prompt(prompt),
        image_url: image_url.to_string(),
        params: SamplingParams::default(),
    };
    let result = match state.synthesis.synthesize(&request).await {
        Ok(urls) if !urls.is_empty() => urls,
        Ok(_) => {
            error!("Synthesis for {} returned no images", user_id);
            return Err(ApiError::GenerationFailure);
        }
        Err(e) => {
            error!("Synthesis for {} failed: {}", user_id, e);
            return Err(ApiError::GenerationFailure);
        }
    };

    // 3. Debit one credit
    let debit_id = uid.clone();
    let remaining_credits = match db_call(state, move |db| db.try_debit_credit(&debit_id)).await {
        Ok(Some(remaining)) => remaining,
        Ok(None) => {
            warn!("Credit for {} was spent concurrently; generation delivered uncharged", user_id);
            0
        }
        Err(e) => {
            error!("Failed to deduct credit for {}: {}", user_id, e);
            profile.credits - 1
        }
    };

    // 4. Record history
    match serde_json::to_string(&result) {
        Ok(result_urls) => {
            let row = GenerationRow {
                id: Uuid::new_v4().to_string(),
                user_id: uid,
                product_id: product_id.map(str::to_string),
                prompt: prompt.to_string(),
                source_image_url: image_url.to_string(),
                result_urls,
                created_at: String::new(),
            };
            if let Err(e) = db_call(state, move |db| db.insert_generation(&row)).await {
                warn!("Failed to record generation for {}: {}", user_id, e);
            }
        }
        Err(e) => warn!("Failed to encode result urls for {}: {}", user_id, e),
    }

    info!("Generated {} image(s) for {}, {} credits left", result.len(), user_id, remaining_credits);

    Ok(Generated {
        result,
        remaining_credits,
    })
}
