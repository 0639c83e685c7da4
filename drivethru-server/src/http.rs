// HTTP routes: live feed, camera registry, station relay and the audit stream

use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{delete, get, post, put},
    Router,
};
use bytes::Bytes;
use drivethru_core::{CameraId, Error as CoreError, Point, VehicleId};
use drivethru_eye::{CameraSpec, MjpegEncoder, VisionError};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} {}: {}", self.status, self.code, self.message);
        }
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

impl From<VisionError> for ApiError {
    fn from(err: VisionError) -> Self {
        let message = err.to_string();
        match err {
            VisionError::InvalidRoi(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_ROI", message)
            }
            VisionError::UnknownCamera(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "CAMERA_NOT_FOUND", message)
            }
            VisionError::DuplicateCamera(_) => {
                ApiError::new(StatusCode::CONFLICT, "CAMERA_EXISTS", message)
            }
            VisionError::Config(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_CONFIG", message)
            }
            VisionError::Camera(_) | VisionError::SourceDisconnected { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "CAMERA_UNAVAILABLE", message)
            }
            VisionError::Core(core) => core.into(),
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::StationProtocol(_) => {
                ApiError::new(StatusCode::CONFLICT, "STATION_PROTOCOL", message)
            }
            CoreError::UnknownStation(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "STATION_NOT_FOUND", message)
            }
            CoreError::UnknownCamera(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "CAMERA_NOT_FOUND", message)
            }
            CoreError::InvalidRoi(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_ROI", message)
            }
            CoreError::Configuration(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_CONFIG", message)
            }
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_camera: Option<CameraId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoiRequest {
    pub points: Vec<Point>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoiResponse {
    pub name: CameraId,
    pub roi: Option<Vec<Point>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CameraResponse {
    pub name: CameraId,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub station: CameraId,
    pub vehicle_id: VehicleId,
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/cameras", get(list_cameras).post(add_camera))
        .route("/cameras/:name", delete(remove_camera))
        .route("/cameras/:name/select", post(select_camera))
        .route("/cameras/:name/roi", put(set_roi).get(get_roi))
        .route("/stations", get(stations))
        .route("/stations/text", get(stations_text))
        .route("/stations/:name/entered", post(vehicle_entered))
        .route("/stations/:name/left", post(vehicle_left))
        .route("/vehicles", post(inject_vehicle))
        .route("/audit/events", get(audit_events));

    Router::new()
        .route("/health", get(health))
        .route("/stream_feed", get(stream_feed))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_camera: state.pipeline.active_camera(),
    })
}

/// MJPEG feed of whatever camera is active. Frames are encoded on the
/// blocking pool; a slow client only ever sees the newest frame.
async fn stream_feed(State(state): State<AppState>) -> Response {
    let frames = state.pipeline.frame_stream();
    let parts = stream::unfold((frames, state.encoder), |(mut frames, encoder)| async move {
        loop {
            let frame = frames.next().await?;
            let worker = encoder.clone();
            match tokio::task::spawn_blocking(move || worker.encode_part(&frame)).await {
                Ok(Ok(part)) => return Some((Ok::<Bytes, Infallible>(part), (frames, encoder))),
                Ok(Err(e)) => warn!("Dropping frame from display stream: {}", e),
                Err(e) => {
                    error!("Display encoder task failed: {}", e);
                    return None;
                }
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, MjpegEncoder::content_type()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.cameras())
}

async fn add_camera(
    State(state): State<AppState>,
    Json(spec): Json<CameraSpec>,
) -> ApiResult<(StatusCode, Json<CameraResponse>)> {
    let id = state.pipeline.add_camera(spec).await?;
    info!("Camera {} registered over HTTP", id);
    Ok((
        StatusCode::CREATED,
        Json(CameraResponse {
            name: id,
            active: false,
        }),
    ))
}

async fn remove_camera(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.pipeline.remove_camera(&CameraId::new(name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn select_camera(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CameraResponse>> {
    let id = CameraId::new(name);
    state.pipeline.select_camera(&id).await?;
    Ok(Json(CameraResponse {
        name: id,
        active: true,
    }))
}

async fn set_roi(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RoiRequest>,
) -> ApiResult<Json<RoiResponse>> {
    let id = CameraId::new(name);
    state.pipeline.set_roi(&id, request.points.clone())?;
    Ok(Json(RoiResponse {
        name: id,
        roi: Some(request.points),
    }))
}

async fn get_roi(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RoiResponse>> {
    let id = CameraId::new(name);
    let roi = state.pipeline.roi(&id)?;
    Ok(Json(RoiResponse {
        name: id,
        roi: roi.map(|r| r.points().to_vec()),
    }))
}

async fn stations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ring.snapshot())
}

async fn stations_text(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.ring.snapshot().to_string(),
    )
}

async fn vehicle_entered(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
    let station = CameraId::new(name);
    let vehicle_id = state.ring.vehicle_entered(&station)?;
    Ok(Json(TransitionResponse {
        station,
        vehicle_id,
    }))
}

async fn vehicle_left(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
    let station = CameraId::new(name);
    let vehicle_id = state.ring.vehicle_left(&station)?;
    Ok(Json(TransitionResponse {
        station,
        vehicle_id,
    }))
}

async fn inject_vehicle(State(state): State<AppState>) -> (StatusCode, Json<TransitionResponse>) {
    let vehicle_id = state.ring.inject();
    (
        StatusCode::CREATED,
        Json(TransitionResponse {
            station: state.ring.entry().clone(),
            vehicle_id,
        }),
    )
}

/// Server-sent audit records, live only. A lagging client skips records.
async fn audit_events(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.audit.subscribe()).filter_map(|record| match record {
        Ok(record) => match Event::default().event("audit").json_data(&record) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Audit record not serializable: {}", e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("Audit stream client lagged, {} records skipped", skipped);
            None
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
