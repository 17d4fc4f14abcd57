//! Clients for the hosted services the studio delegates to.
//!
//! Each collaborator is a narrow async trait (`SynthesisService`,
//! `CatalogScraper`, `Mailer`) with one HTTP implementation. Handlers only
//! ever see `Arc<dyn Trait>`, so tests swap in fakes without a network.

pub mod error;
pub mod mailer;
pub mod scraper;
pub mod synthesis;

pub use error::ProviderError;
pub use mailer::{DisabledMailer, Mailer, OutgoingEmail, ResendClient};
pub use scraper::{ApifyClient, CatalogScraper, ScrapeOutcome, ScrapeRequest};
pub use synthesis::{ReplicateClient, SamplingParams, SynthesisRequest, SynthesisService};
