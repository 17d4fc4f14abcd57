mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use studio_api::modernize;
use studio_api::routes;
use studio_api::state::{self, Providers, Settings};
use studio_providers::{ApifyClient, DisabledMailer, Mailer, ReplicateClient, ResendClient};

use crate::config::Config;

/// Used when `RUST_LOG` is unset. Names every workspace crate that logs.
const DEFAULT_LOG_FILTER: &str = "studio=debug,studio_api=debug,studio_db=debug,studio_providers=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = studio_db::Database::open(&config.db_path)?;

    // One HTTP client shared by every provider; its timeout is the only
    // bound on synthesis and scraping calls.
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let mailer: Arc<dyn Mailer> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendClient::new(http.clone(), &config.resend_base_url, key)),
        None => {
            warn!("RESEND_API_KEY not set; welcome emails are disabled");
            Arc::new(DisabledMailer)
        }
    };

    let providers = Providers {
        synthesis: Arc::new(ReplicateClient::new(http.clone(), &config.replicate_base_url, &config.replicate_token)),
        scraper: Arc::new(ApifyClient::new(http, &config.apify_base_url, &config.apify_token)),
        mailer,
    };

    let settings = Settings {
        jwt_secret: config.jwt_secret.clone(),
        signup_credits: config.signup_credits,
        site_url: config.site_url.clone(),
        mail_from: config.mail_from.clone(),
    };

    // Shared state (also starts the modernize worker)
    let app_state = state::build(db, settings, providers);
    modernize::resume_unfinished(&app_state).await?;

    let app = routes::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Studio server listening on {}", addr);
    info!("New accounts receive {} credits", config.signup_credits);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_every_logging_crate() {
        for target in ["studio", "studio_api", "studio_db", "studio_providers"] {
            assert!(DEFAULT_LOG_FILTER.split(',').any(|d| d == format!("{target}=debug")), "{target}");
        }
        tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
    }
}
