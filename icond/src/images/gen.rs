//! Icon generation pipeline
//!
//! Strictly sequential per request:
//! 1. Validate the request (nothing runs on invalid input)
//! 2. Synthesize one 512x512 master under the engine's concurrency ceiling
//! 3. Derive every other size and encode inline previews
//! 4. Commit one record to the session cache, then sweep expired records
//!
//! Any failure aborts the whole request and leaves the cache untouched.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{TimeDelta, Utc};
use image::GenericImageView;
use rand::Rng;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use super::resample::{derive_all, MASTER_SIZE};
use super::store::round2;
use super::{codec, GenerationRecord, IconFormat, SessionCache, TimingBreakdown};
use crate::error::IconError;
use crate::synth::{MemoryStats, SynthesisEngine, SynthesisRequest};
use crate::Config;

/// Maximum prompt length in characters
pub const MAX_PROMPT_CHARS: usize = 500;

const OPTIMIZATION: &str = "Single 512x512 generation + high-quality downscaling";

/// Inbound generation request
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_use_gpu")]
    pub use_gpu: bool,
}

fn default_use_gpu() -> bool {
    true
}

impl GenerateRequest {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            steps: None,
            format: None,
            use_gpu: true,
        }
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub steps: u32,
    pub format: IconFormat,
    pub use_gpu: bool,
}

/// Generation metadata returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct GenerationMetadata {
    pub seed: u32,
    pub steps: u32,
    pub format: IconFormat,
    pub generation_time_seconds: f64,
    pub timing_breakdown: TimingBreakdown,
    pub device: String,
    /// `None` (serialized as `{}`) when the caller disabled the accelerator
    #[serde(serialize_with = "memory_or_empty")]
    pub memory_usage_gb: Option<MemoryStats>,
    pub model: String,
    pub optimization: &'static str,
}

fn memory_or_empty<S: Serializer>(
    memory: &Option<MemoryStats>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match memory {
        Some(stats) => stats.serialize(serializer),
        None => serializer.serialize_map(Some(0))?.end(),
    }
}

/// Outbound generation result
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub generation_id: String,
    /// Size label -> inline data URI
    pub icons: BTreeMap<String, String>,
    pub metadata: GenerationMetadata,
}

/// Check a request against the configured limits
pub fn validate_request(
    request: &GenerateRequest,
    config: &Config,
) -> Result<GenerationParams, IconError> {
    let chars = request.prompt.chars().count();
    if request.prompt.trim().is_empty() {
        return Err(IconError::InvalidParameter(
            "Prompt must not be empty".to_string(),
        ));
    }
    if chars > MAX_PROMPT_CHARS {
        return Err(IconError::InvalidParameter(format!(
            "Prompt must be at most {} characters, got {}",
            MAX_PROMPT_CHARS, chars
        )));
    }

    let steps = request.steps.unwrap_or(config.default_steps);
    if !config.available_steps.contains(&steps) {
        return Err(IconError::InvalidParameter(format!(
            "Steps must be one of {:?}",
            config.available_steps
        )));
    }

    let format = match &request.format {
        Some(token) => IconFormat::requested(token)?,
        None => IconFormat::Png,
    };

    Ok(GenerationParams {
        prompt: request.prompt.clone(),
        steps,
        format,
        use_gpu: request.use_gpu,
    })
}

/// Prefix the style tag and append the icon style suffix
pub fn enhance_prompt(prompt: &str, config: &Config) -> String {
    format!("{}, {}{}", config.prompt_tag, prompt, config.prompt_suffix)
}

/// Run the full pipeline for one request
pub async fn generate_icons(
    engine: &SynthesisEngine,
    cache: &SessionCache,
    config: &Config,
    request: GenerateRequest,
) -> Result<GenerationResult, IconError> {
    let params = validate_request(&request, config)?;
    let seed: u32 = rand::rng().random();

    info!(
        "Generating icon set with seed {} ({} steps, {})",
        seed, params.steps, params.format
    );

    let synthesis = SynthesisRequest {
        prompt: enhance_prompt(&params.prompt, config),
        size: MASTER_SIZE,
        steps: params.steps,
        guidance: config.guidance_scale,
        seed,
        use_gpu: params.use_gpu,
    };
    debug!("Enhanced prompt: {}", synthesis.prompt);

    let start = Instant::now();
    let output = engine.synthesize(&synthesis).await?;
    let ai_generation = start.elapsed().as_secs_f64();

    let (width, height) = output.image.dimensions();
    if width != MASTER_SIZE || height != MASTER_SIZE {
        return Err(IconError::Synthesis(format!(
            "expected a {MASTER_SIZE}x{MASTER_SIZE} master, got {width}x{height}"
        )));
    }

    let format = params.format;
    let (icons, previews) = tokio::task::spawn_blocking(move || {
        let icons = derive_all(output.image)?;
        let previews = codec::encode_inline_all(&icons, format)?;
        Ok::<_, IconError>((icons, previews))
    })
    .await
    .map_err(|e| IconError::Internal(format!("derivation task failed: {}", e)))??;

    let timing = TimingBreakdown::new(ai_generation, start.elapsed().as_secs_f64());
    let memory = params.use_gpu.then_some(output.memory);

    let record = GenerationRecord::new(
        icons,
        format,
        &params.prompt,
        seed,
        params.steps,
        timing,
        &output.device,
        memory.unwrap_or_default(),
    );
    let generation_id = cache.put(record);

    let swept = cache.sweep_expired(Utc::now(), retention(config));
    if swept > 0 {
        debug!("Swept {} expired generations", swept);
    }

    info!(
        "Generation {} complete in {:.2}s (synthesis {:.2}s)",
        generation_id, timing.total, timing.ai_generation
    );

    Ok(GenerationResult {
        generation_id,
        icons: previews,
        metadata: GenerationMetadata {
            seed,
            steps: params.steps,
            format,
            generation_time_seconds: round2(timing.total),
            timing_breakdown: timing.rounded(),
            device: output.device,
            memory_usage_gb: memory,
            model: engine.model_name().to_string(),
            optimization: OPTIMIZATION,
        },
    })
}

/// Configured retention as a chrono delta
pub(crate) fn retention(config: &Config) -> TimeDelta {
    TimeDelta::try_hours(i64::try_from(config.retention_hours).unwrap_or(i64::MAX))
        .unwrap_or(TimeDelta::MAX)
}
