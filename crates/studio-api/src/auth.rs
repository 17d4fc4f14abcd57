use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::{State, rejection::JsonRejection}, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use studio_providers::OutgoingEmail;
use studio_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let email = req.email.trim().to_lowercase();

    // Validate input
    if email.len() < 3 || email.len() > 254 || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters".into()));
    }

    // Check if the email is taken
    let lookup = email.clone();
    let existing = db_call(&state, move |db| db.get_user_by_email(&lookup))
        .await
        .map_err(ApiError::internal("User lookup failed"))?;
    if existing.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(ApiError::internal("Password hashing failed"))?
        .to_string();

    let user_id = Uuid::new_v4();
    let credits = state.settings.signup_credits;

    let (uid, em, full_name) = (user_id.to_string(), email.clone(), req.full_name.clone());
    db_call(&state, move |db| {
        db.create_user_with_profile(&uid, &em, &password_hash, full_name.as_deref(), credits)
    })
    .await
    .map_err(|e| {
        // Lost a race with a concurrent signup for the same address.
        if studio_db::is_constraint_violation(&e) {
            ApiError::Conflict("Email already registered".into())
        } else {
            ApiError::internal("Could not create account")(e)
        }
    })?;

    info!("Registered user {} with {} credits", user_id, credits);
    send_welcome(&state, &email);

    let token = issue_token(&state.settings.jwt_secret, user_id, &email)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let email = req.email.trim().to_lowercase();

    let user = db_call(&state, move |db| db.get_user_by_email(&email))
        .await
        .map_err(ApiError::internal("User lookup failed"))?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(ApiError::internal("Stored hash unreadable"))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(ApiError::internal("Corrupt user id"))?;

    let token = issue_token(&state.settings.jwt_secret, user_id, &user.email)?;

    Ok(Json(LoginResponse {
        user_id,
        email: user.email,
        token,
    }))
}

/// Tokens are valid for 30 days.
pub fn issue_token(secret: &str, user_id: Uuid, email: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::internal("Token signing failed"))
}

/// Fire-and-forget: a mail outage must never fail signup.
fn send_welcome(state: &AppState, email: &str) {
    let message = OutgoingEmail::welcome(&state.settings.mail_from, email, &state.settings.site_url);
    let mailer = state.mailer.clone();
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&message).await {
            warn!("Welcome email to {} failed: {}", message.to.join(", "), e);
        }
    });
}
