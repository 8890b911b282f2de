//! icond - PWA icon generation daemon
//!
//! Turns a text prompt into a full set of PWA icons: one master image from an
//! external diffusion service, every other size derived by resampling, and
//! zip bundles with a manifest ready to drop into a web app.

pub mod api;
pub mod error;
pub mod images;
pub mod synth;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use api::AppState;
use images::SessionCache;
use synth::{HttpSynthesizer, QueuePolicy, SynthesisEngine, Synthesizer};

pub use error::IconError;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Base URL of the diffusion service; unset means generation is unavailable
    pub synth_url: Option<String>,
    pub synth_timeout_secs: u64,
    /// Model description reported in generation metadata
    pub model_name: String,
    pub available_steps: Vec<u32>,
    pub default_steps: u32,
    pub guidance_scale: f32,
    pub max_concurrent_generations: usize,
    pub queue_policy: QueuePolicy,
    pub retention_hours: u64,
    pub max_bundle_mb: f64,
    pub app_name: String,
    /// Style tag prefixed to every prompt
    pub prompt_tag: String,
    /// Style suffix appended to every prompt
    pub prompt_suffix: String,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8088)),
            synth_url: None,
            synth_timeout_secs: 300,
            model_name: "Stable Diffusion 1.5 + LoRA".to_string(),
            available_steps: vec![20, 50],
            default_steps: 20,
            guidance_scale: 7.5,
            max_concurrent_generations: 1,
            queue_policy: QueuePolicy::Queue,
            retention_hours: 1,
            max_bundle_mb: 10.0,
            app_name: images::bundle::DEFAULT_APP_NAME.to_string(),
            prompt_tag: "icons".to_string(),
            prompt_suffix: ", app icon design, ZOOMED IN, CLOSE UP VIEW, fills entire frame, \
                edge to edge, large scale, no padding, no margins, centered, flat design, \
                simple, clean, professional, solid color background"
                .to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:8088".to_string(),
            ],
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file, then `ICOND_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("ICOND_")).extract()
    }
}

/// The icond server instance
pub struct Server {
    config: Config,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a server talking to the configured diffusion service
    pub fn new(config: Config) -> Result<Self> {
        let backend = HttpSynthesizer::new(
            config.synth_url.clone(),
            &config.model_name,
            Duration::from_secs(config.synth_timeout_secs),
        )?;
        Ok(Self::with_synthesizer(config, Arc::new(backend)))
    }

    /// Create a server around any synthesis backend
    pub fn with_synthesizer(config: Config, backend: Arc<dyn Synthesizer>) -> Self {
        let engine = SynthesisEngine::shared(
            backend,
            config.max_concurrent_generations,
            config.queue_policy,
        );
        let state = AppState {
            config: Arc::new(config.clone()),
            engine,
            cache: SessionCache::shared(),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            state,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Get the shared application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("icond listening on {}", local_addr);

        // Load the model in the background; requests retry if this fails
        let engine = self.state.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.initialize().await {
                warn!("Synthesis engine not ready: {}", e);
            }
        });

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("icond shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
