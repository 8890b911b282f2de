//! Common test utilities - IcondTest harness for end-to-end testing
//!
//! Spawns a fake diffusion service and a real icond server on random ports.
//! The fake service renders a deterministic gradient for every request, and
//! answers 507 when the prompt mentions "exhaust".

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use icond::{Config, Server};
use image::{DynamicImage, ImageFormat, RgbImage};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// What the fake diffusion service has seen
#[derive(Default)]
pub struct FakeDiffusion {
    pub requests: Mutex<Vec<Value>>,
    pub releases: AtomicUsize,
    /// Edge length of rendered images; 0 means "whatever was asked for"
    pub render_size: AtomicUsize,
}

impl FakeDiffusion {
    pub fn last_request(&self) -> Option<Value> {
        self.requests.lock().last().cloned()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

fn gradient_png(size: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(size, size, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode gradient");
    bytes
}

async fn fake_health() -> Json<Value> {
    Json(json!({ "device": "cpu" }))
}

async fn fake_generate(
    State(fake): State<Arc<FakeDiffusion>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    fake.requests.lock().push(body.clone());

    let prompt = body["prompt"].as_str().unwrap_or_default();
    if prompt.contains("exhaust") {
        return (
            StatusCode::INSUFFICIENT_STORAGE,
            Json(json!({ "error": "out_of_memory" })),
        );
    }

    let size = match fake.render_size.load(Ordering::SeqCst) {
        0 => body["width"].as_u64().unwrap_or(512) as u32,
        n => n as u32,
    };

    (
        StatusCode::OK,
        Json(json!({
            "image_b64": BASE64.encode(gradient_png(size)),
            "device": "cpu",
            "memory": { "allocated_gb": 1.5, "reserved_gb": 2.0, "max_allocated_gb": 2.5 },
        })),
    )
}

async fn fake_release(State(fake): State<Arc<FakeDiffusion>>) -> StatusCode {
    fake.releases.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn spawn_fake_diffusion(fake: Arc<FakeDiffusion>) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let app = Router::new()
        .route("/health", get(fake_health))
        .route("/generate", post(fake_generate))
        .route("/release", post(fake_release))
        .with_state(fake);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Fake diffusion error: {}", e);
        }
    });

    Ok(addr)
}

/// Test harness that spawns a real icond server on a random port
pub struct IcondTest {
    pub addr: SocketAddr,
    pub client: Client,
    pub fake: Arc<FakeDiffusion>,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl IcondTest {
    /// Start a server backed by the fake diffusion service
    pub async fn start() -> Result<Self> {
        Self::start_with(Config::default()).await
    }

    /// Start with a custom config; `bind_addr` and `synth_url` are overwritten
    pub async fn start_with(mut config: Config) -> Result<Self> {
        let fake = Arc::new(FakeDiffusion::default());
        let synth_addr = spawn_fake_diffusion(fake.clone()).await?;

        // Find a random available port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        config.bind_addr = addr;
        config.synth_url = Some(format!("http://{}", synth_addr));

        let server = Arc::new(Server::new(config)?);
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }

        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            fake,
            server,
            _handle: handle,
        })
    }

    /// Get the base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// POST a generation request
    pub async fn generate(&self, body: Value) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}/api/generate", self.base_url()))
            .json(&body)
            .send()
            .await?)
    }

    /// Generate with a prompt and return the generation id
    pub async fn generate_id(&self, prompt: &str) -> Result<String> {
        let response = self.generate(json!({ "prompt": prompt })).await?;
        anyhow::ensure!(
            response.status().is_success(),
            "generation failed: {}",
            response.status()
        );
        let body: Value = response.json().await?;
        body["generation_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing generation_id"))
    }
}

impl Drop for IcondTest {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
