use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use facemark_vision::{AnnotateOptions, DetectorService, FaceDetector, RenderStyle};
use log::{error, info};
use serde::Deserialize;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::provider;

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<dyn FaceDetector>,
    pub options: AnnotateOptions,
}

/// Raw query values; parsed by hand so a bad value can be named.
#[derive(Debug, Default, Deserialize)]
pub struct RenderParams {
    pub line_thickness: Option<String>,
    pub point_size: Option<String>,
}

impl RenderParams {
    fn apply(&self, base: &AnnotateOptions) -> Result<AnnotateOptions, ApiError> {
        let line_thickness = self
            .line_thickness
            .as_deref()
            .map(|raw| parse_stroke("line_thickness", raw, 1))
            .transpose()?
            .and_then(NonZeroU32::new);
        let point_size = self
            .point_size
            .as_deref()
            .map(|raw| parse_stroke("point_size", raw, 0))
            .transpose()?;

        Ok(AnnotateOptions {
            style: base.style.with_overrides(line_thickness, point_size),
            ..*base
        })
    }
}

/// Parse a stroke size in `min..=RenderStyle::MAX_STROKE`.
fn parse_stroke(name: &'static str, raw: &str, min: u32) -> Result<u32, ApiError> {
    let max = RenderStyle::MAX_STROKE;
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| ApiError::InvalidParameter {
            name,
            reason: format!("expected an integer between {min} and {max}, got {raw:?}"),
        })
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", post(annotate_upload).options(preflight))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .with_state(state)
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
            (header::ACCESS_CONTROL_MAX_AGE, "3600"),
        ],
    )
}

async fn annotate_upload(
    State(state): State<AppState>,
    params: Result<Query<RenderParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let result = handle(state, params, multipart, request_id).await;
    match &result {
        Ok(_) => info!("[{request_id}] annotated upload"),
        Err(err) => info!("[{request_id}] answered {}", err.status().as_u16()),
    }
    result
}

async fn handle(
    state: AppState,
    params: Result<Query<RenderParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
    request_id: Uuid,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|_| ApiError::NoFile)?;

    let (filename, bytes) = loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::NoFile),
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::TooLarge)
            }
            Err(_) => return Err(ApiError::NoFile),
        };
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|err| {
            if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::TooLarge
            } else {
                ApiError::NoFile
            }
        })?;
        break (filename, bytes);
    };

    if filename.is_empty() {
        return Err(ApiError::NoFilename);
    }

    let Query(params) = params.map_err(|err| ApiError::InvalidParameter {
        name: "query",
        reason: err.body_text(),
    })?;
    let options = params.apply(&state.options)?;

    log::debug!(
        "[{request_id}] {filename}: {} bytes, thickness {}, point size {}",
        bytes.len(),
        options.style.line_thickness,
        options.style.point_radius
    );

    let detector = state.detector.clone();
    let annotated = tokio::task::spawn_blocking(move || {
        facemark_vision::annotate(detector.as_ref(), &bytes, &options)
    })
    .await
    .map_err(|err| ApiError::Internal(format!("annotation task failed: {err}")))??;

    info!(
        "[{request_id}] {filename}: {} face(s) on {}x{}",
        annotated.faces, annotated.width, annotated.height
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/jpeg")],
        annotated.jpeg,
    )
        .into_response())
}

/// Provision the models, load the detector once, and serve until the
/// process is stopped.
pub async fn serve(config: Config) -> Result<()> {
    provider::ensure_models(&config)
        .await
        .context("provisioning models")?;

    info!("Loading models from {}", config.model_dir.display());
    let detector = DetectorService::new(
        &config.detector_model_path(),
        &config.landmark_model_path(),
        config.detector_options(),
    )
    .context("loading face detector")?;

    let state = AppState {
        detector: Arc::new(detector),
        options: AnnotateOptions {
            style: config.render_style(),
            backdrop: config.backdrop.into(),
            jpeg_quality: config.jpeg_quality,
        },
    };
    let app = router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!("Listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("could not listen for shutdown signal: {err}");
        return;
    }
    info!("Shutting down");
}
