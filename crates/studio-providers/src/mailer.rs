use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, check_status};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    /// Sent once, right after signup.
    pub fn welcome(from: &str, to: &str, site_url: &str) -> Self {
        let dashboard = format!("{}/dashboard", site_url.trim_end_matches('/'));
        Self {
            from: from.to_string(),
            to: vec![to.to_string()],
            subject: "Welcome to VisionAI Studio!".to_string(),
            html: format!(
                "<div style=\"font-family: sans-serif; max-width: 600px; margin: auto; padding: 20px;\">\
                 <h2>Welcome to VisionAI!</h2>\
                 <p>Your account has been created. You're ready to turn product photos into studio-quality assets.</p>\
                 <ul><li>Upload your first product shot</li><li>Apply AI studio lighting</li><li>Export HD results</li></ul>\
                 <a href=\"{}\">Go to Dashboard</a>\
                 </div>",
                dashboard
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Resend transactional email API.
pub struct ResendClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ResendClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Mailer for ResendClient {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await?;
        check_status(resp).await?;
        info!("Email '{}' sent to {}", email.subject, email.to.join(", "));
        Ok(())
    }
}

/// Used when no mail API key is configured.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        debug!("Mail disabled, dropping '{}' to {}", email.subject, email.to.join(", "));
        Ok(())
    }
}
