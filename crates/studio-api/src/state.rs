use std::sync::Arc;

use studio_db::Database;
use studio_providers::{CatalogScraper, Mailer, SynthesisService};

use crate::modernize::{self, ModernizeQueue};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub settings: Settings,
    pub synthesis: Arc<dyn SynthesisService>,
    pub scraper: Arc<dyn CatalogScraper>,
    pub mailer: Arc<dyn Mailer>,
    pub modernize: ModernizeQueue,
}

/// Values read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt_secret: String,
    /// Free credits granted to every new account.
    pub signup_credits: i64,
    pub site_url: String,
    pub mail_from: String,
}

/// External collaborators, injected so tests can run without a network.
pub struct Providers {
    pub synthesis: Arc<dyn SynthesisService>,
    pub scraper: Arc<dyn CatalogScraper>,
    pub mailer: Arc<dyn Mailer>,
}

/// Assemble the shared state and start the modernize worker on the current
/// runtime.
pub fn build(db: Database, settings: Settings, providers: Providers) -> AppState {
    let (queue, jobs) = ModernizeQueue::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        settings,
        synthesis: providers.synthesis,
        scraper: providers.scraper,
        mailer: providers.mailer,
        modernize: queue,
    });
    modernize::spawn_worker(state.clone(), jobs);
    state
}

/// Run a blocking DB call off the async runtime.
pub async fn db_call<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
