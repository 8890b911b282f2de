//! HTTP client for an external diffusion service
//!
//! Wire contract:
//! - `GET  {base}/health`   -> `{"device": "cuda"}`
//! - `POST {base}/generate` -> `{"image_b64": "...", "device": "cuda", "memory": {...}}`
//! - `POST {base}/release`  -> best-effort accelerator cache release
//!
//! A 507 response, or an error body of `{"error": "out_of_memory"}`, means the
//! accelerator ran out of memory.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MemoryStats, SynthesisOutput, SynthesisRequest, Synthesizer};
use crate::error::IconError;
use crate::images::codec;

/// Generation request body
#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    num_inference_steps: u32,
    guidance_scale: f32,
    seed: u32,
    use_gpu: bool,
}

/// Generation response body
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    image_b64: String,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    memory: Option<MemoryStats>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Synthesizer backed by a remote diffusion service
#[derive(Debug)]
pub struct HttpSynthesizer {
    /// HTTP client
    client: Client,
    /// Service base URL, `None` when not configured
    base_url: Option<String>,
    /// Reported model description
    model: String,
}

impl HttpSynthesizer {
    /// Create a client. `timeout` bounds each request to the service.
    pub fn new(
        base_url: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, IconError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IconError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            model: model.to_string(),
        })
    }

    /// Check if a service URL is configured
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn base_url(&self) -> Result<&str, IconError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| IconError::Unavailable("synthesis service URL not configured".to_string()))
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn load(&self) -> Result<String, IconError> {
        let base_url = self.base_url()?;

        let response = self
            .client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .map_err(|e| IconError::Unavailable(format!("health check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IconError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| IconError::Unavailable(format!("failed to parse health response: {}", e)))?;

        Ok(health.device.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, IconError> {
        let base_url = self.base_url()?;

        let body = GenerateBody {
            prompt: &request.prompt,
            width: request.size,
            height: request.size,
            num_inference_steps: request.steps,
            guidance_scale: request.guidance,
            seed: request.seed,
            use_gpu: request.use_gpu,
        };

        debug!("Sending synthesis request to {}", base_url);

        let response = self
            .client
            .post(format!("{}/generate", base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| IconError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Synthesis service error: {} - {}", status, text);

            let out_of_memory = status == StatusCode::INSUFFICIENT_STORAGE
                || serde_json::from_str::<ErrorBody>(&text)
                    .map(|b| b.error == "out_of_memory")
                    .unwrap_or(false);
            if out_of_memory {
                return Err(IconError::ResourceExhaustion(
                    "Insufficient GPU memory. Try reducing steps or disabling GPU.".to_string(),
                ));
            }
            return Err(IconError::Synthesis(format!("API error: {}", status)));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| IconError::Synthesis(format!("failed to parse response: {}", e)))?;

        let bytes = BASE64
            .decode(generated.image_b64.as_bytes())
            .map_err(|e| IconError::Synthesis(format!("invalid image payload: {}", e)))?;
        let image = codec::decode(&bytes)
            .map_err(|e| IconError::Synthesis(format!("undecodable image payload: {}", e)))?;

        Ok(SynthesisOutput {
            image,
            device: generated.device.unwrap_or_else(|| "unknown".to_string()),
            memory: generated.memory.unwrap_or_default(),
        })
    }

    async fn release_memory(&self) {
        let Ok(base_url) = self.base_url() else {
            return;
        };
        if let Err(e) = self
            .client
            .post(format!("{}/release", base_url))
            .send()
            .await
        {
            warn!("Failed to release accelerator memory: {}", e);
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
