use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, Result, check_status};

/// Shopify catalog scraper actor on the Apify platform.
pub const SHOPIFY_SCRAPER_ACTOR: &str = "dhrumil/shopify-products-scraper";

/// Seconds the platform may hold each run request open before answering.
const WAIT_FOR_FINISH_SECS: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRequest {
    /// Listing page to start from, already normalized.
    pub start_url: String,
    pub max_items: u32,
    pub use_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub run_id: String,
    /// Raw dataset records, passed through untouched.
    pub items: Vec<serde_json::Value>,
}

#[async_trait]
pub trait CatalogScraper: Send + Sync {
    /// Start a scraping run, wait for it to finish and return its dataset.
    async fn scrape(&self, req: &ScrapeRequest) -> Result<ScrapeOutcome>;
}

pub struct ApifyClient {
    http: Client,
    base_url: String,
    token: String,
    actor: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActorInput<'a> {
    start_urls: [StartUrl<'a>; 1],
    max_items: u32,
    proxy_configuration: ProxyConfiguration,
}

#[derive(Serialize)]
struct StartUrl<'a> {
    url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyConfiguration {
    use_apify_proxy: bool,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorRun {
    id: String,
    status: String,
    default_dataset_id: String,
}

impl ApifyClient {
    pub fn new(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            // The REST API addresses actors as `user~name`.
            actor: SHOPIFY_SCRAPER_ACTOR.replace('/', "~"),
        }
    }

    async fn wait_for_run(&self, run_id: &str) -> Result<ActorRun> {
        let resp = self
            .http
            .get(format!("{}/v2/actor-runs/{}", self.base_url, run_id))
            .query(&[("waitForFinish", WAIT_FOR_FINISH_SECS)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let envelope: Envelope<ActorRun> = check_status(resp).await?.json().await?;
        Ok(envelope.data)
    }

    async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<serde_json::Value>> {
        let resp = self
            .http
            .get(format!("{}/v2/datasets/{}/items", self.base_url, dataset_id))
            .query(&[("format", "json"), ("clean", "true")])
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }
}

#[async_trait]
impl CatalogScraper for ApifyClient {
    async fn scrape(&self, req: &ScrapeRequest) -> Result<ScrapeOutcome> {
        let input = ActorInput {
            start_urls: [StartUrl { url: &req.start_url }],
            max_items: req.max_items,
            proxy_configuration: ProxyConfiguration {
                use_apify_proxy: req.use_proxy,
            },
        };

        let resp = self
            .http
            .post(format!("{}/v2/acts/{}/runs", self.base_url, self.actor))
            .query(&[("waitForFinish", WAIT_FOR_FINISH_SECS)])
            .bearer_auth(&self.token)
            .json(&input)
            .send()
            .await?;
        let mut run = check_status(resp).await?.json::<Envelope<ActorRun>>().await?.data;
        info!("Scraper run {} started for {} ({})", run.id, req.start_url, run.status);

        while matches!(run.status.as_str(), "READY" | "RUNNING") {
            run = self.wait_for_run(&run.id).await?;
            debug!("Scraper run {} is {}", run.id, run.status);
        }

        if run.status != "SUCCEEDED" {
            return Err(ProviderError::Failed(format!(
                "Scraper run {} finished with status {}",
                run.id, run.status
            )));
        }

        let items = self.dataset_items(&run.default_dataset_id).await?;
        info!("Scraper run {} returned {} items", run.id, items.len());

        Ok(ScrapeOutcome {
            run_id: run.id,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn request() -> ScrapeRequest {
        ScrapeRequest {
            start_url: "https://shop.example/collections/all".to_string(),
            max_items: 20,
            use_proxy: true,
        }
    }

    #[tokio::test]
    async fn runs_actor_then_reads_dataset() {
        let server = MockServer::start_async().await;
        let run = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/acts/dhrumil~shopify-products-scraper/runs")
                    .query_param("waitForFinish", "60")
                    .header("authorization", "Bearer apify_test")
                    .json_body(json!({
                        "startUrls": [{ "url": "https://shop.example/collections/all" }],
                        "maxItems": 20,
                        "proxyConfiguration": { "useApifyProxy": true }
                    }));
                then.status(201).json_body(json!({
                    "data": { "id": "run-1", "status": "SUCCEEDED", "defaultDatasetId": "ds-1" }
                }));
            })
            .await;
        let items = server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/datasets/ds-1/items").query_param("clean", "true");
                then.status(200).json_body(json!([
                    { "title": "Mug", "vendor": "Acme", "images": [{ "src": "https://cdn.example/mug.png" }] },
                    { "title": "Poster", "vendor": "Acme", "images": [] }
                ]));
            })
            .await;

        let client = ApifyClient::new(Client::new(), server.base_url(), "apify_test");
        let outcome = client.scrape(&request()).await.unwrap();

        run.assert_async().await;
        items.assert_async().await;
        assert_eq!(outcome.run_id, "run-1");
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.items[0]["title"], "Mug");
    }

    #[tokio::test]
    async fn waits_on_a_run_that_is_still_going() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/acts/dhrumil~shopify-products-scraper/runs");
                then.status(201).json_body(json!({
                    "data": { "id": "run-2", "status": "RUNNING", "defaultDatasetId": "ds-2" }
                }));
            })
            .await;
        let wait = server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/actor-runs/run-2");
                then.status(200).json_body(json!({
                    "data": { "id": "run-2", "status": "SUCCEEDED", "defaultDatasetId": "ds-2" }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/datasets/ds-2/items");
                then.status(200).json_body(json!([]));
            })
            .await;

        let client = ApifyClient::new(Client::new(), server.base_url(), "t");
        let outcome = client.scrape(&request()).await.unwrap();

        wait.assert_async().await;
        assert!(outcome.items.is_empty());
    }

    #[tokio::test]
    async fn failed_run_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/acts/dhrumil~shopify-products-scraper/runs");
                then.status(201).json_body(json!({
                    "data": { "id": "run-3", "status": "FAILED", "defaultDatasetId": "ds-3" }
                }));
            })
            .await;

        let client = ApifyClient::new(Client::new(), server.base_url(), "t");
        let err = client.scrape(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "Scraper run run-3 finished with status FAILED");
    }
}
