//! Application state
//!
//! Configuration read from the environment and the handles shared with the
//! HTTP handlers

use crate::acquisition::CameraStatus;
use crate::alarm_dispatcher::AlarmDispatcher;
use crate::camera::{CameraSpec, CaptureProperties};
use crate::pipeline::{PipelineControls, ToggleSnapshot};
use crate::state_store::StateStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Device index, stream URL or video file (`CAMERA_INDEX`)
    pub camera: String,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,
    /// Mirror frames horizontally before processing
    pub flip_frame: bool,
    /// Deliver alarms to the notification endpoint
    pub alarm_enabled: bool,
    /// Notification endpoint base URL (`LINE_IP`)
    pub line_ip: Option<String>,
    /// `local` or `cloudinary`
    pub storage_backend: String,
    pub cloudinary_cloud_name: String,
    pub cloudinary_api_key: String,
    pub cloudinary_api_secret: String,
    /// Local alarm image directory
    pub alarm_image_dir: PathBuf,
    /// Public URL prefix under which `alarm_image_dir` is served
    pub alarm_public_url: Option<String>,
    /// Known-identity gallery root
    pub known_faces_dir: PathBuf,
    /// Face / object inference server
    pub inference_url: String,
    /// Initial detection toggles (face recognition on, the rest off)
    pub toggles: ToggleSnapshot,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// `true`, `1`, `yes` and `on` (any case) are truthy
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

impl AppConfig {
    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let flag_or = |key: &str, default: bool| lookup(key).map(|v| parse_bool(&v)).unwrap_or(default);
        let flag = |key: &str| flag_or(key, false);
        let number = |key: &str, default: u32| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            camera: string("CAMERA_INDEX", "0"),
            camera_width: number("CAMERA_WIDTH", 640),
            camera_height: number("CAMERA_HEIGHT", 480),
            camera_fps: number("CAMERA_FPS", 15),
            flip_frame: flag("FLIP_FRAME"),
            alarm_enabled: flag("ALARM_FLAG"),
            line_ip: optional("LINE_IP"),
            storage_backend: string("STORAGE_BACKEND", "local"),
            cloudinary_cloud_name: string("CLOUDINARY_CLOUD_NAME", ""),
            cloudinary_api_key: string("CLOUDINARY_API_KEY", ""),
            cloudinary_api_secret: string("CLOUDINARY_API_SECRET", ""),
            alarm_image_dir: PathBuf::from(string("ALARM_IMAGE_DIR", "alarm_images")),
            alarm_public_url: optional("ALARM_PUBLIC_URL"),
            known_faces_dir: PathBuf::from(string("KNOWN_FACES_DIR", "KnownFaces")),
            inference_url: string("INFERENCE_URL", "http://localhost:9000"),
            toggles: ToggleSnapshot {
                motion: flag("MOTION_DETECTION"),
                face: flag_or("FACE_RECOGNITION", true),
                crossline: flag("CROSSLINE_DETECTION"),
                pipeline: flag("PIPELINE_DETECTION"),
            },
            host: string("HOST", "0.0.0.0"),
            port: lookup("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(5000),
        }
    }

    pub fn camera_spec(&self) -> CameraSpec {
        CameraSpec::parse(&self.camera)
    }

    pub fn capture_properties(&self) -> CaptureProperties {
        CaptureProperties {
            width: self.camera_width,
            height: self.camera_height,
            fps: self.camera_fps,
            ..Default::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: Arc<AppConfig>,
    /// Latest frames and info records per channel
    pub store: Arc<StateStore>,
    /// Toggles, sensitivity and cross-lines
    pub controls: Arc<PipelineControls>,
    /// Acquisition thread health
    pub camera: Arc<CameraStatus>,
    /// Alarm queue (counters only on the HTTP side)
    pub alarms: Arc<AlarmDispatcher>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.camera_spec(), CameraSpec::Device(0));
        assert_eq!(c.port, 5000);
        assert_eq!(c.known_faces_dir, PathBuf::from("KnownFaces"));
        assert!(!c.flip_frame && !c.alarm_enabled);
        assert_eq!(
            c.toggles,
            ToggleSnapshot {
                face: true,
                ..ToggleSnapshot::default()
            }
        );
        assert_eq!(c.capture_properties(), CaptureProperties::default());
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("CAMERA_INDEX", "rtsp://cam/1"),
            ("CAMERA_WIDTH", "1280"),
            ("FLIP_FRAME", "Yes"),
            ("ALARM_FLAG", "1"),
            ("LINE_IP", "  "),
            ("PORT", "not-a-port"),
            ("FACE_RECOGNITION", "on"),
        ]);
        assert_eq!(c.camera_spec(), CameraSpec::Url("rtsp://cam/1".into()));
        assert_eq!(c.capture_properties().width, 1280);
        assert!(c.flip_frame && c.alarm_enabled);
        assert_eq!(c.line_ip, None);
        assert_eq!(c.port, 5000);
        assert!(c.toggles.face && !c.toggles.motion);
    }

    #[test]
    fn test_face_recognition_can_start_disabled() {
        let c = config(&[("FACE_RECOGNITION", "false"), ("MOTION_DETECTION", "on")]);
        assert!(!c.toggles.face);
        assert!(c.toggles.motion);
    }

    #[test]
    fn test_parse_bool() {
        for v in ["true", "TRUE", "1", "yes", " on "] {
            assert!(parse_bool(v), "{}", v);
        }
        for v in ["false", "0", "", "enabled"] {
            assert!(!parse_bool(v), "{}", v);
        }
    }
}
