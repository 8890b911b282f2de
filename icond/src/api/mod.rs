//! HTTP API module - generation and download endpoints

mod download;
mod generate;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::IconError;
use crate::images::{codec::REQUEST_FORMATS, IconFormat, SessionCache, SizeLabel};
use crate::synth::{MemoryStats, SynthesisEngine};
use crate::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<SynthesisEngine>,
    pub cache: Arc<SessionCache>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .merge(generate::router())
        .merge(download::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for IconError {
    fn into_response(self) -> Response {
        let status = match &self {
            IconError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            IconError::NotFound => StatusCode::NOT_FOUND,
            IconError::ResourceExhaustion(_) => StatusCode::INSUFFICIENT_STORAGE,
            IconError::BundleTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IconError::Busy | IconError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IconError::Encoding(_)
            | IconError::Synthesis(_)
            | IconError::Archive(_)
            | IconError::Io(_)
            | IconError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "icond",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: EndpointList {
            generate: "/api/generate",
            download_bundle: "/api/download/bundle/{generation_id}",
            download_single: "/api/download/single/{generation_id}/{size}",
            status: "/api/status",
        },
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    endpoints: EndpointList,
}

#[derive(Serialize)]
struct EndpointList {
    generate: &'static str,
    download_bundle: &'static str,
    download_single: &'static str,
    status: &'static str,
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// API and model status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let device = state.engine.device();
    let gpu_memory = match device.as_deref() {
        Some("cuda") => Some(state.engine.memory_usage().unwrap_or_default()),
        _ => None,
    };

    Json(StatusResponse {
        api: "online",
        model_state: state.engine.state().to_string(),
        model: state.engine.model_name().to_string(),
        device: device.unwrap_or_else(|| "not initialized".to_string()),
        cached_generations: state.cache.len(),
        gpu_memory,
        config: StatusConfig {
            available_steps: state.config.available_steps.clone(),
            available_formats: REQUEST_FORMATS.to_vec(),
            icon_sizes: SizeLabel::ALL.iter().map(|label| label.pixels()).collect(),
        },
    })
}

#[derive(Serialize)]
struct StatusResponse {
    api: &'static str,
    model_state: String,
    model: String,
    device: String,
    cached_generations: usize,
    /// Only reported when the model runs on a CUDA device
    #[serde(skip_serializing_if = "Option::is_none")]
    gpu_memory: Option<MemoryStats>,
    config: StatusConfig,
}

#[derive(Serialize)]
struct StatusConfig {
    available_steps: Vec<u32>,
    available_formats: Vec<IconFormat>,
    icon_sizes: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{
        HttpSynthesizer, QueuePolicy, SynthesisOutput, SynthesisRequest, Synthesizer,
    };
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let backend = HttpSynthesizer::new(None, "offline", Duration::from_secs(1)).unwrap();
        AppState {
            config: Arc::new(Config::default()),
            engine: SynthesisEngine::shared(Arc::new(backend), 1, QueuePolicy::Queue),
            cache: SessionCache::shared(),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (IconError::InvalidParameter("x".into()), 400),
            (IconError::NotFound, 404),
            (IconError::BundleTooLarge { size_mb: 11.0, max_mb: 10.0 }, 413),
            (IconError::Encoding("x".into()), 500),
            (IconError::Busy, 503),
            (IconError::ResourceExhaustion("x".into()), 507),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status().as_u16(), expected);
        }
    }

    #[tokio::test]
    async fn test_status_before_initialization() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["api"], "online");
        assert_eq!(body["model_state"], "uninitialized");
        assert_eq!(body["device"], "not initialized");
        assert_eq!(body["cached_generations"], 0);
        assert!(body.get("gpu_memory").is_none());
        assert_eq!(body["config"]["available_formats"], serde_json::json!(["png", "jpeg"]));
        assert_eq!(body["config"]["icon_sizes"], serde_json::json!([512, 192, 164, 16]));
    }

    /// Loads onto "cuda" and reports fixed memory use
    struct CudaBackend;

    #[async_trait::async_trait]
    impl Synthesizer for CudaBackend {
        async fn load(&self) -> Result<String, IconError> {
            Ok("cuda".to_string())
        }

        async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, IconError> {
            Ok(SynthesisOutput {
                image: image::DynamicImage::new_rgb8(request.size, request.size),
                device: "cuda".to_string(),
                memory: MemoryStats {
                    allocated_gb: 2.0,
                    reserved_gb: 3.0,
                    max_allocated_gb: 4.0,
                },
            })
        }

        fn model_name(&self) -> &str {
            "cuda-test"
        }
    }

    #[tokio::test]
    async fn test_status_reports_gpu_memory_on_cuda() {
        let state = AppState {
            config: Arc::new(Config::default()),
            engine: SynthesisEngine::shared(Arc::new(CudaBackend), 1, QueuePolicy::Queue),
            cache: SessionCache::shared(),
        };
        state.engine.initialize().await.unwrap();

        let response = router(state.clone())
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["device"], "cuda");
        assert_eq!(body["gpu_memory"]["allocated_gb"], 0.0);

        let request = Request::post("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"prompt": "a lighthouse"}"#))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["gpu_memory"]["allocated_gb"], 2.0);
        assert_eq!(body["gpu_memory"]["max_allocated_gb"], 4.0);
    }

    #[tokio::test]
    async fn test_generate_without_backend_is_unavailable() {
        let app = router(test_state());
        let request = Request::post("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"prompt": "a lighthouse"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert!(body["detail"].as_str().unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn test_unknown_generation_is_not_found() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::get("/api/download/bundle/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["detail"], "generation not found or expired");
    }
}
