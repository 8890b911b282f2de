//! Generation endpoint
//!
//! POST /api/generate - Generate every icon size from a prompt

use axum::{extract::State, routing::post, Json, Router};

use super::AppState;
use crate::error::IconError;
use crate::images::{generate_icons, GenerateRequest, GenerationResult};

/// Build the generation router
pub fn router() -> Router<AppState> {
    Router::new().route("/api/generate", post(generate))
}

/// Generate an icon set and return inline previews
async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerationResult>, IconError> {
    let result = generate_icons(&state.engine, &state.cache, &state.config, request).await?;
    Ok(Json(result))
}
