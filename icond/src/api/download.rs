//! Download endpoints
//!
//! GET /api/download/bundle/{generation_id}        - Zip of every size
//! GET /api/download/single/{generation_id}/{size} - One icon file

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::error::IconError;
use crate::images::{bundle, compute_digest, GenerationRecord, IconFormat, SizeLabel};

/// Build the download router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/download/bundle/{generation_id}", get(download_bundle))
        .route(
            "/api/download/single/{generation_id}/{size}",
            get(download_single),
        )
}

/// Optional format override
#[derive(Debug, Deserialize)]
struct DownloadQuery {
    format: Option<String>,
}

/// An absent or empty `format` falls back to the record's format
fn output_format(record: &GenerationRecord, query: &DownloadQuery) -> Result<IconFormat, IconError> {
    match query.format.as_deref() {
        Some(token) if !token.is_empty() => IconFormat::requested(token),
        _ => Ok(record.format),
    }
}

async fn download_bundle(
    Path(generation_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    State(state): State<AppState>,
) -> Result<Response, IconError> {
    let record = state.cache.get(&generation_id)?;
    let format = output_format(&record, &query)?;

    let app_name = state.config.app_name.clone();
    let bytes = {
        let record = record.clone();
        tokio::task::spawn_blocking(move || bundle::build_bundle(&record.icons, format, &app_name))
            .await
            .map_err(|e| IconError::Internal(format!("bundle task failed: {}", e)))??
    };

    let size_mb = bundle::measure_size_mb(&bytes);
    let max_mb = state.config.max_bundle_mb;
    if size_mb > max_mb {
        warn!(
            "Rejecting bundle for {}: {:.2}MB exceeds {}MB",
            generation_id, size_mb, max_mb
        );
        return Err(IconError::BundleTooLarge { size_mb, max_mb });
    }

    info!("Serving bundle for {} ({:.2}MB)", generation_id, size_mb);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, bundle::BUNDLE_MIME_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename={}",
                    bundle::bundle_filename(&record.id)
                ),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn download_single(
    Path((generation_id, size)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    State(state): State<AppState>,
) -> Result<Response, IconError> {
    let record = state.cache.get(&generation_id)?;

    let label = SizeLabel::parse(&size).ok_or_else(|| {
        IconError::InvalidParameter(
            "Invalid size. Must be one of: 512, 192, 164, 16".to_string(),
        )
    })?;
    let format = output_format(&record, &query)?;

    let bytes = {
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let image = record.icons.get(label).ok_or(IconError::NotFound)?;
            bundle::build_single(image, label, format)
        })
        .await
        .map_err(|e| IconError::Internal(format!("encode task failed: {}", e)))??
    };

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                bundle::single_mime_type(label, format).to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename={}",
                    bundle::icon_filename(label, format)
                ),
            ),
            (header::ETAG, format!("\"{}\"", compute_digest(&bytes))),
        ],
        bytes,
    )
        .into_response())
}
