//! Synthesis engine
//!
//! Provides:
//! - The `Synthesizer` seam to the external diffusion backend
//! - Explicit model initialization with observable state
//! - A concurrency ceiling around synthesis (queue or reject beyond it)

mod http;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::error::IconError;

pub use http::HttpSynthesizer;

/// One synthesis call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    /// Fully enhanced prompt
    pub prompt: String,
    /// Square edge length
    pub size: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: u32,
    /// Ask the backend to use its accelerator
    pub use_gpu: bool,
}

/// Accelerator memory statistics in GB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub allocated_gb: f64,
    pub reserved_gb: f64,
    pub max_allocated_gb: f64,
}

/// Result of a synthesis call
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub image: DynamicImage,
    /// Device the backend ran on ("cuda", "cpu", ...)
    pub device: String,
    pub memory: MemoryStats,
}

/// External image synthesis capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Bring the model up; returns the device it runs on
    async fn load(&self) -> Result<String, IconError>;

    /// `synthesize(prompt, size, steps, guidance, seed) -> image`
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, IconError>;

    /// Ask the backend to drop cached accelerator memory
    async fn release_memory(&self) {}

    /// Human-readable model description
    fn model_name(&self) -> &str;
}

/// Model lifecycle as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready { device: String },
    Failed(String),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => f.write_str("uninitialized"),
            EngineState::Loading => f.write_str("loading"),
            EngineState::Ready { .. } => f.write_str("ready"),
            EngineState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// What to do with a synthesis request when the ceiling is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait for the running synthesis to finish
    #[default]
    Queue,
    /// Fail immediately with `IconError::Busy`
    Reject,
}

/// Owns the synthesis backend and serializes access to it
pub struct SynthesisEngine {
    backend: Arc<dyn Synthesizer>,
    state: RwLock<EngineState>,
    init_lock: Mutex<()>,
    permits: Semaphore,
    policy: QueuePolicy,
    /// Memory reported by the most recent successful synthesis
    last_memory: RwLock<Option<MemoryStats>>,
}

impl fmt::Debug for SynthesisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisEngine")
            .field("model", &self.backend.model_name())
            .field("state", &*self.state.read())
            .field("available_permits", &self.permits.available_permits())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SynthesisEngine {
    /// Create an engine allowing `max_concurrent` syntheses at once (at least 1)
    pub fn new(backend: Arc<dyn Synthesizer>, max_concurrent: usize, policy: QueuePolicy) -> Self {
        Self {
            backend,
            state: RwLock::new(EngineState::Uninitialized),
            init_lock: Mutex::new(()),
            permits: Semaphore::new(max_concurrent.max(1)),
            policy,
            last_memory: RwLock::new(None),
        }
    }

    /// Create a shared instance
    pub fn shared(
        backend: Arc<dyn Synthesizer>,
        max_concurrent: usize,
        policy: QueuePolicy,
    ) -> Arc<Self> {
        Arc::new(Self::new(backend, max_concurrent, policy))
    }

    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    /// Device reported at load time, if ready
    pub fn device(&self) -> Option<String> {
        match &*self.state.read() {
            EngineState::Ready { device } => Some(device.clone()),
            _ => None,
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Accelerator memory as of the last successful synthesis
    pub fn memory_usage(&self) -> Option<MemoryStats> {
        *self.last_memory.read()
    }

    /// Load the model unless it is already ready.
    /// A failed engine is retried on the next call.
    pub async fn initialize(&self) -> Result<(), IconError> {
        let _guard = self.init_lock.lock().await;

        let ready = matches!(*self.state.read(), EngineState::Ready { .. });
        if ready {
            return Ok(());
        }

        *self.state.write() = EngineState::Loading;
        info!("Loading synthesis model '{}'", self.backend.model_name());

        match self.backend.load().await {
            Ok(device) => {
                info!("Synthesis model ready on {}", device);
                *self.state.write() = EngineState::Ready { device };
                Ok(())
            }
            Err(e) => {
                warn!("Synthesis model failed to load: {}", e);
                *self.state.write() = EngineState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Run one synthesis under the concurrency ceiling.
    /// The permit is released as soon as the backend returns.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, IconError> {
        let _permit = match self.policy {
            QueuePolicy::Queue => self
                .permits
                .acquire()
                .await
                .map_err(|_| IconError::Unavailable("synthesis engine closed".to_string()))?,
            QueuePolicy::Reject => self.permits.try_acquire().map_err(|_| IconError::Busy)?,
        };

        self.initialize().await?;

        debug!(
            "Synthesizing {}x{} with seed {} ({} steps, guidance {})",
            request.size, request.size, request.seed, request.steps, request.guidance
        );

        let result = self.backend.synthesize(request).await;
        match &result {
            Ok(output) => *self.last_memory.write() = Some(output.memory),
            Err(IconError::ResourceExhaustion(reason)) => {
                warn!("Accelerator memory exhausted ({}), releasing cache", reason);
                self.backend.release_memory().await;
            }
            Err(_) => {}
        }
        result
    }
}
