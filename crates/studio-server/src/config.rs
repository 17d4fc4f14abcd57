use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub signup_credits: i64,
    pub site_url: String,
    pub http_timeout: Duration,
    pub replicate_token: String,
    pub replicate_base_url: String,
    pub apify_token: String,
    pub apify_base_url: String,
    /// Mail is disabled when unset.
    pub resend_api_key: Option<String>,
    pub resend_base_url: String,
    pub mail_from: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("STUDIO_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("STUDIO_JWT_SECRET is unset or still a placeholder");
        }

        let port = or("STUDIO_PORT", "3000")
            .parse()
            .context("STUDIO_PORT must be a port number")?;
        let signup_credits: i64 = or("STUDIO_SIGNUP_CREDITS", "10")
            .parse()
            .context("STUDIO_SIGNUP_CREDITS must be an integer")?;
        if signup_credits < 0 {
            bail!("STUDIO_SIGNUP_CREDITS must not be negative");
        }
        let timeout_secs: u64 = or("STUDIO_HTTP_TIMEOUT_SECS", "300")
            .parse()
            .context("STUDIO_HTTP_TIMEOUT_SECS must be a number of seconds")?;

        Ok(Self {
            host: or("STUDIO_HOST", "0.0.0.0"),
            port,
            db_path: or("STUDIO_DB_PATH", "studio.db").into(),
            jwt_secret,
            signup_credits,
            site_url: or("STUDIO_SITE_URL", "http://localhost:3000"),
            http_timeout: Duration::from_secs(timeout_secs),
            replicate_token: get("REPLICATE_API_TOKEN").context("REPLICATE_API_TOKEN is required")?,
            replicate_base_url: or("REPLICATE_BASE_URL", "https://api.replicate.com"),
            apify_token: get("APIFY_API_TOKEN").context("APIFY_API_TOKEN is required")?,
            apify_base_url: or("APIFY_BASE_URL", "https://api.apify.com"),
            resend_api_key: get("RESEND_API_KEY").filter(|k| !k.is_empty()),
            resend_base_url: or("RESEND_BASE_URL", "https://api.resend.com"),
            mail_from: or("STUDIO_MAIL_FROM", "VisionAI <onboarding@resend.dev>"),
        })
    }
}
