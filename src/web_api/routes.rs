//! API Routes

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::cross_line::CrossLine;
use crate::error::{Error, Result};
use crate::models::{ApiResponse, Point, StatusResponse};
use crate::pipeline::Feature;
use crate::state::AppState;
use crate::state_store::{Channel, CrossLineInfo, FaceInfo, MotionInfo, PipelineInfo, StateStore};

/// Interval between MJPEG parts (~30 Hz)
pub const STREAM_PERIOD: Duration = Duration::from_millis(33);

const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/status", get(status))
        // Frames
        .route("/capture", get(capture_current))
        .route("/stream", get(stream_current))
        .route("/:channel/capture", get(capture_channel))
        .route("/:channel/stream", get(stream_channel))
        // Controls
        .route("/detection/:feature", post(toggle_detection))
        .route("/motion/sensitivity", post(set_motion_sensitivity))
        .route("/crossline/lines", post(set_crossline_lines))
        // Info records
        .route("/motion/info", get(motion_info))
        .route("/face/info", get(face_info))
        .route("/crossline/info", get(crossline_info))
        .route("/pipeline/info", get(pipeline_info))
        .with_state(state)
}

// ========================================
// Status
// ========================================

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let toggles = state.controls.toggles();
    Json(StatusResponse {
        running: state.camera.is_running(),
        camera_connected: state.camera.is_connected(),
        fps: state.camera.fps(),
        frames: state.camera.frames(),
        reconnects: state.camera.reconnects(),
        alarms_queued: state.alarms.queued_count(),
        alarms_dropped: state.alarms.dropped_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        motion_enabled: toggles.motion,
        face_enabled: toggles.face,
        crossline_enabled: toggles.crossline,
        pipeline_enabled: toggles.pipeline,
    })
}

// ========================================
// Frame Handlers
// ========================================

fn jpeg_response(store: &StateStore, channel: Channel) -> Result<Response> {
    let bytes = store
        .latest_jpeg(channel)?
        .ok_or_else(|| Error::NotFound(format!("no frame published on {} yet", channel)))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        bytes,
    )
        .into_response())
}

async fn capture_current(State(state): State<AppState>) -> Result<Response> {
    jpeg_response(&state.store, Channel::Current)
}

async fn capture_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Response> {
    let channel: Channel = channel.parse()?;
    jpeg_response(&state.store, channel)
}

/// One multipart part: boundary, headers, JPEG body
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Endless stream of the channel's latest frame; ticks without a frame are skipped
pub fn mjpeg_stream(
    store: Arc<StateStore>,
    channel: Channel,
    period: Duration,
) -> impl Stream<Item = std::result::Result<Vec<u8>, Infallible>> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    futures::stream::unfold((store, ticker), move |(store, mut ticker)| async move {
        loop {
            ticker.tick().await;
            match store.latest_jpeg(channel) {
                Ok(Some(jpeg)) => return Some((Ok(mjpeg_part(&jpeg)), (store, ticker))),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Failed to encode stream frame");
                }
            }
        }
    })
}

fn stream_response(store: Arc<StateStore>, channel: Channel) -> Response {
    tracing::debug!(channel = %channel, "MJPEG client connected");
    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(mjpeg_stream(store, channel, STREAM_PERIOD)),
    )
        .into_response()
}

async fn stream_current(State(state): State<AppState>) -> Response {
    stream_response(state.store.clone(), Channel::Current)
}

async fn stream_channel(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Response> {
    let channel: Channel = channel.parse()?;
    Ok(stream_response(state.store.clone(), channel))
}

// ========================================
// Control Handlers
// ========================================

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub enabled: bool,
}

async fn toggle_detection(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ApiResponse<()>>> {
    let feature: Feature = feature.parse()?;
    state.controls.set_enabled(feature, req.enabled);

    Ok(Json(ApiResponse::message(format!(
        "{} {}",
        feature.label(),
        if req.enabled { "enabled" } else { "disabled" }
    ))))
}

fn default_motion_threshold() -> u64 {
    10_000
}

fn default_alarm_threshold() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct SensitivityRequest {
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: u64,
    #[serde(default = "default_alarm_threshold")]
    pub alarm_threshold: u32,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SensitivityResponse {
    pub motion_threshold: u64,
    pub alarm_threshold: u32,
}

async fn set_motion_sensitivity(
    State(state): State<AppState>,
    Json(req): Json<SensitivityRequest>,
) -> Json<ApiResponse<SensitivityResponse>> {
    state
        .controls
        .set_sensitivity(req.motion_threshold, req.alarm_threshold);
    tracing::info!(
        motion_threshold = req.motion_threshold,
        alarm_threshold = req.alarm_threshold,
        "Motion sensitivity updated"
    );

    Json(ApiResponse::success(
        format!(
            "Motion sensitivity set to {} and alarm threshold set to {}",
            req.motion_threshold, req.alarm_threshold
        ),
        SensitivityResponse {
            motion_threshold: req.motion_threshold,
            alarm_threshold: req.alarm_threshold,
        },
    ))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineRequest {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
}

fn default_image_width() -> i32 {
    640
}

fn default_image_height() -> i32 {
    480
}

#[derive(Debug, Deserialize)]
pub struct CrossLinesRequest {
    #[serde(default)]
    pub lines: Vec<LineRequest>,
    #[serde(default = "default_image_width")]
    pub image_width: i32,
    #[serde(default = "default_image_height")]
    pub image_height: i32,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ConfiguredLine {
    pub index: usize,
    pub start: (i32, i32),
    pub end: (i32, i32),
}

#[derive(Debug, Serialize)]
pub struct CrossLinesResponse {
    pub status: String,
    pub message: String,
    pub lines_count: usize,
    pub lines: Vec<ConfiguredLine>,
}

async fn set_crossline_lines(
    State(state): State<AppState>,
    Json(req): Json<CrossLinesRequest>,
) -> Json<CrossLinesResponse> {
    let candidates: Vec<CrossLine> = req
        .lines
        .iter()
        .map(|l| CrossLine::new(Point::new(l.start_x, l.start_y), Point::new(l.end_x, l.end_y)))
        .collect();
    let accepted = state
        .controls
        .replace_lines(&candidates, req.image_width, req.image_height);

    let message = if candidates.is_empty() {
        "All cross lines cleared".to_string()
    } else {
        format!("Configured {} cross lines", accepted.len())
    };
    let lines: Vec<ConfiguredLine> = accepted
        .iter()
        .map(|a| ConfiguredLine {
            index: a.index,
            start: (a.line.a.x, a.line.a.y),
            end: (a.line.b.x, a.line.b.y),
        })
        .collect();

    Json(CrossLinesResponse {
        status: "success".to_string(),
        message,
        lines_count: lines.len(),
        lines,
    })
}

// ========================================
// Info Handlers
// ========================================

async fn motion_info(State(state): State<AppState>) -> Json<MotionInfo> {
    Json(state.store.motion_info())
}

async fn face_info(State(state): State<AppState>) -> Json<FaceInfo> {
    Json(state.store.face_info())
}

async fn crossline_info(State(state): State<AppState>) -> Json<CrossLineInfo> {
    Json(state.store.crossline_info())
}

async fn pipeline_info(State(state): State<AppState>) -> Json<PipelineInfo> {
    Json(state.store.pipeline_info())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::CameraStatus;
    use crate::alarm_dispatcher::AlarmDispatcher;
    use crate::models::Frame;
    use crate::pipeline::PipelineControls;
    use crate::state::AppConfig;
    use futures::StreamExt;
    use image::Rgb;

    fn state() -> AppState {
        let (alarms, _rx) = AlarmDispatcher::new(4);
        AppState {
            config: Arc::new(AppConfig::from_lookup(|_| None)),
            store: Arc::new(StateStore::new()),
            controls: Arc::new(PipelineControls::default()),
            camera: Arc::new(CameraStatus::default()),
            alarms: Arc::new(alarms),
        }
    }

    #[tokio::test]
    async fn test_toggle_detection() {
        let state = state();
        let Json(resp) = toggle_detection(
            State(state.clone()),
            Path("face".to_string()),
            Json(ToggleRequest { enabled: true }),
        )
        .await
        .unwrap();
        assert_eq!(resp.message.as_deref(), Some("Face recognition enabled"));
        assert!(state.controls.is_enabled(Feature::Face));

        let err = toggle_detection(
            State(state),
            Path("teleport".to_string()),
            Json(ToggleRequest { enabled: true }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sensitivity_defaults() {
        let state = state();
        let req: SensitivityRequest = serde_json::from_str(r#"{"motion_threshold": 500}"#).unwrap();
        let Json(resp) = set_motion_sensitivity(State(state.clone()), Json(req)).await;
        assert_eq!(
            resp.data,
            Some(SensitivityResponse {
                motion_threshold: 500,
                alarm_threshold: 20
            })
        );
        assert_eq!(state.controls.sensitivity(), (1, 500, 20));
    }

    #[tokio::test]
    async fn test_crossline_lines_validated() {
        let state = state();
        let req: CrossLinesRequest = serde_json::from_str(
            r#"{"lines": [
                {"startX": 0, "startY": 240, "endX": 640, "endY": 240},
                {"startX": 0, "startY": 0, "endX": 900, "endY": 10}
            ]}"#,
        )
        .unwrap();
        let Json(resp) = set_crossline_lines(State(state.clone()), Json(req)).await;
        assert_eq!(resp.lines_count, 1);
        assert_eq!(
            resp.lines,
            vec![ConfiguredLine {
                index: 0,
                start: (0, 240),
                end: (640, 240)
            }]
        );
        assert_eq!(state.controls.lines().1.len(), 1);

        let req: CrossLinesRequest = serde_json::from_str(r#"{"lines": []}"#).unwrap();
        let Json(resp) = set_crossline_lines(State(state.clone()), Json(req)).await;
        assert_eq!(resp.lines_count, 0);
        assert_eq!(resp.message, "All cross lines cleared");
        assert!(state.controls.lines().1.is_empty());
    }

    #[tokio::test]
    async fn test_capture_requires_published_frame() {
        let state = state();
        let err = capture_current(State(state.clone())).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        state
            .store
            .publish(Channel::Motion, &Frame::from_pixel(8, 8, Rgb([1, 2, 3])));
        let resp = capture_channel(State(state.clone()), Path("motion".to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");

        assert!(capture_channel(State(state), Path("attic".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn test_info_endpoints_serialize_camel_case() {
        let state = state();
        state.store.record_faces(&["Alice"]);
        let Json(info) = face_info(State(state)).await;
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["faceCount"], 1);
        assert_eq!(json["faceNames"], "Alice");
    }

    #[tokio::test]
    async fn test_status_reports_toggles() {
        let state = state();
        state.controls.set_enabled(Feature::Pipeline, true);
        let Json(s) = status(State(state)).await;
        assert!(s.pipeline_enabled && !s.motion_enabled);
        assert!(!s.camera_connected);
        assert_eq!(s.alarms_dropped, 0);
    }

    #[tokio::test]
    async fn test_mjpeg_stream_waits_for_frame() {
        let store = Arc::new(StateStore::new());
        let mut stream = Box::pin(mjpeg_stream(store.clone(), Channel::Current, Duration::from_millis(5)));

        let publisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(Channel::Current, &Frame::from_pixel(4, 4, Rgb([0, 0, 0])));
        });

        let part = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"\r\n"));
    }
}
