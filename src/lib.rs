//! Vigil Camserver Library
//!
//! Single-camera surveillance orchestrator
//!
//! ## Architecture
//!
//! 1. Camera - ffmpeg-backed frame source
//! 2. AcquisitionLoop - read/flip/dispatch loop with reconnection (own OS thread)
//! 3. FrameDispatcher - per-frame stage routing (`pipeline`)
//! 4. MotionDetector - frame differencing with sustained-motion alarms
//! 5. IdentityResolver - track-to-identity cache, gallery search, self-learning
//! 6. CrossLineTracker - line crossing geometry over track centres
//! 7. MotionTriggeredStateMachine - motion-gated person recognition
//! 8. StateStore - latest frame / info record per channel
//! 9. AlarmDispatcher - bounded alarm queue and delivery worker
//! 10. WebAPI - snapshots, MJPEG streams, controls, info records
//!
//! ## Threading
//!
//! The acquisition thread owns every stateful stage. HTTP handlers only read
//! the StateStore and write PipelineControls.

pub mod acquisition;
pub mod alarm_dispatcher;
pub mod annotate;
pub mod camera;
pub mod cross_line;
pub mod error;
pub mod identity;
pub mod inference_client;
pub mod models;
pub mod motion_detector;
pub mod motion_trigger;
pub mod pipeline;
pub mod state;
pub mod state_store;
pub mod storage;
pub mod tracker;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
