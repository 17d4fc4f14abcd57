use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, Result, check_status};

/// SDXL img2img, pinned so results stay reproducible across model updates.
pub const SDXL_VERSION: &str = "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Sampling knobs sent with every prediction. The defaults are the studio
/// settings: strong enough to re-stage the scene, weak enough to keep the
/// product's shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SamplingParams {
    pub prompt_strength: f64,
    pub num_inference_steps: u32,
    pub scheduler: &'static str,
    pub guidance_scale: f64,
    pub high_noise_frac: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            prompt_strength: 0.65,
            num_inference_steps: 30,
            scheduler: "K_EULER_ANCESTRAL",
            guidance_scale: 7.5,
            high_noise_frac: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Full prompt, already templated.
    pub prompt: String,
    pub image_url: String,
    pub params: SamplingParams,
}

#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Run one image-to-image synthesis and wait for the final output.
    /// Returns the result image URLs; may be empty if the model produced
    /// nothing usable.
    async fn synthesize(&self, req: &SynthesisRequest) -> Result<Vec<String>>;
}

/// Replicate predictions API client.
pub struct ReplicateClient {
    http: Client,
    base_url: String,
    token: String,
    version: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct CreatePrediction<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    image: &'a str,
    #[serde(flatten)]
    params: &'a SamplingParams,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: serde_json::Value,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ReplicateClient {
    pub fn new(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            version: SDXL_VERSION.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn fetch(&self, id: &str) -> Result<Prediction> {
        let resp = self
            .http
            .get(format!("{}/v1/predictions/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }
}

#[async_trait]
impl SynthesisService for ReplicateClient {
    async fn synthesize(&self, req: &SynthesisRequest) -> Result<Vec<String>> {
        let body = CreatePrediction {
            version: &self.version,
            input: PredictionInput {
                prompt: &req.prompt,
                image: &req.image_url,
                params: &req.params,
            },
        };

        let resp = self
            .http
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await?;
        let mut prediction: Prediction = check_status(resp).await?.json().await?;
        info!("Prediction {} created ({})", prediction.id, prediction.status);

        // `Prefer: wait` usually returns a finished prediction; keep polling if not.
        while matches!(prediction.status.as_str(), "starting" | "processing") {
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.fetch(&prediction.id).await?;
            debug!("Prediction {} is {}", prediction.id, prediction.status);
        }

        match prediction.status.as_str() {
            "succeeded" => Ok(output_urls(&prediction.output)),
            "failed" | "canceled" => {
                let reason = prediction
                    .error
                    .map(|e| match e {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| format!("prediction {}", prediction.status));
                Err(ProviderError::Failed(reason))
            }
            other => Err(ProviderError::Decode(format!("unknown prediction status '{}'", other))),
        }
    }
}

/// Models return either a single URL or a list of them.
fn output_urls(output: &serde_json::Value) -> Vec<String> {
    match output {
        serde_json::Value::String(url) => vec![url.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            prompt: "Professional product photography, on a beach".to_string(),
            image_url: "https://cdn.example/mug.png".to_string(),
            params: SamplingParams::default(),
        }
    }

    #[test]
    fn output_normalization() {
        assert_eq!(output_urls(&json!("https://a/1.png")), ["https://a/1.png"]);
        assert_eq!(output_urls(&json!(["https://a/1.png", 3, "https://a/2.png"])), ["https://a/1.png", "https://a/2.png"]);
        assert!(output_urls(&serde_json::Value::Null).is_empty());
    }

    #[tokio::test]
    async fn sends_pinned_version_and_studio_params() {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/predictions")
                    .header("authorization", "Bearer r8_test")
                    .header("prefer", "wait")
                    .json_body(json!({
                        "version": SDXL_VERSION,
                        "input": {
                            "prompt": "Professional product photography, on a beach",
                            "image": "https://cdn.example/mug.png",
                            "prompt_strength": 0.65,
                            "num_inference_steps": 30,
                            "scheduler": "K_EULER_ANCESTRAL",
                            "guidance_scale": 7.5,
                            "high_noise_frac": 0.8
                        }
                    }));
                then.status(201).json_body(json!({
                    "id": "p1",
                    "status": "succeeded",
                    "output": ["https://replicate.delivery/out-0.png"]
                }));
            })
            .await;

        let client = ReplicateClient::new(Client::new(), server.base_url(), "r8_test");
        let urls = client.synthesize(&request()).await.unwrap();

        create.assert_async().await;
        assert_eq!(urls, ["https://replicate.delivery/out-0.png"]);
    }

    #[tokio::test]
    async fn polls_until_the_prediction_finishes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/predictions");
                then.status(201).json_body(json!({ "id": "p2", "status": "processing", "output": null }));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/predictions/p2");
                then.status(200).json_body(json!({
                    "id": "p2",
                    "status": "succeeded",
                    "output": "https://replicate.delivery/single.png"
                }));
            })
            .await;

        let client = ReplicateClient::new(Client::new(), server.base_url(), "t")
            .with_poll_interval(Duration::from_millis(5));
        let urls = client.synthesize(&request()).await.unwrap();

        poll.assert_async().await;
        assert_eq!(urls, ["https://replicate.delivery/single.png"]);
    }

    #[tokio::test]
    async fn failed_prediction_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/predictions");
                then.status(201).json_body(json!({ "id": "p3", "status": "failed", "error": "NSFW content detected" }));
            })
            .await;

        let client = ReplicateClient::new(Client::new(), server.base_url(), "t");
        let err = client.synthesize(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Failed(ref msg) if msg == "NSFW content detected"));
    }

    #[tokio::test]
    async fn rejected_token_surfaces_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/predictions");
                then.status(401).body("Unauthenticated");
            })
            .await;

        let client = ReplicateClient::new(Client::new(), server.base_url(), "bad");
        let err = client.synthesize(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 401, .. }));
    }
}
