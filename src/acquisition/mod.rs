//! AcquisitionLoop - Camera Read / Dispatch Loop
//!
//! ## Responsibilities
//!
//! - Pull frames from the `CameraSource` on a dedicated OS thread
//! - Optional horizontal flip before processing
//! - Consecutive-failure counting and camera reconnection
//! - Baseline invalidation when the frame size changes
//! - Rolling FPS estimate and connection status for `/status`
//!
//! ## Failure Policy
//!
//! A failed read increments the failure counter and backs off briefly; a
//! successful read resets it. A failed dispatch only logs and backs off, it
//! never counts toward reconnection. At `max_failures` the camera is
//! released, the loop pauses, the camera is reopened with the same capture
//! properties and the last observed frame size is forgotten.

use crate::camera::{CameraSource, CaptureProperties};
use crate::error::Result;
use crate::models::Frame;
use crate::pipeline::FrameDispatcher;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub max_failures: u32,
    pub reconnect_pause: Duration,
    pub error_backoff: Duration,
    pub flip: bool,
    pub capture: CaptureProperties,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_failures: 10,
            reconnect_pause: Duration::from_secs(2),
            error_backoff: Duration::from_millis(100),
            flip: false,
            capture: CaptureProperties::default(),
        }
    }
}

/// Per-frame consumer driven by the loop
pub trait FrameHandler: Send {
    fn handle(&mut self, frame: &Frame) -> Result<()>;

    /// Frame size changed or camera was reopened
    fn reset_baselines(&mut self);
}

impl FrameHandler for FrameDispatcher {
    fn handle(&mut self, frame: &Frame) -> Result<()> {
        self.dispatch(frame)
    }

    fn reset_baselines(&mut self) {
        FrameDispatcher::reset_baselines(self);
    }
}

/// Camera health shared with the HTTP layer
#[derive(Debug, Default)]
pub struct CameraStatus {
    running: AtomicBool,
    connected: AtomicBool,
    fps: AtomicU32,
    frames: AtomicU64,
    reconnects: AtomicU64,
}

impl CameraStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Frames counted per one-second window
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    /// Count one frame; returns the rate when a window closes
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = (self.frames as f64 / elapsed.as_secs_f64()).round() as u32;
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}

pub struct AcquisitionLoop<C: CameraSource, H: FrameHandler> {
    config: AcquisitionConfig,
    camera: C,
    handler: H,
    status: Arc<CameraStatus>,
    stop: Arc<AtomicBool>,
    failures: u32,
    last_size: Option<(u32, u32)>,
}

impl<C: CameraSource, H: FrameHandler> AcquisitionLoop<C, H> {
    /// Create new AcquisitionLoop
    pub fn new(config: AcquisitionConfig, camera: C, handler: H, status: Arc<CameraStatus>) -> Self {
        Self {
            config,
            camera,
            handler,
            status,
            stop: Arc::new(AtomicBool::new(false)),
            failures: 0,
            last_size: None,
        }
    }

    /// Flag that ends the loop at the next iteration
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn open_camera(&mut self) {
        match self.camera.open(&self.config.capture) {
            Ok(()) => {
                self.status.connected.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open camera");
                self.status.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    fn reconnect(&mut self) {
        tracing::warn!(
            failures = self.failures,
            pause_ms = self.config.reconnect_pause.as_millis() as u64,
            "Too many consecutive failures, reconnecting camera"
        );
        self.camera.release();
        self.status.connected.store(false, Ordering::Relaxed);
        self.status.reconnects.fetch_add(1, Ordering::Relaxed);

        std::thread::sleep(self.config.reconnect_pause);
        if self.stopped() {
            return;
        }

        self.open_camera();
        self.failures = 0;
        self.last_size = None;
    }

    fn fail(&mut self) {
        self.failures += 1;
        self.backoff();
    }

    fn backoff(&self) {
        if !self.config.error_backoff.is_zero() {
            std::thread::sleep(self.config.error_backoff);
        }
    }

    fn process(&mut self, mut frame: Frame) -> Result<()> {
        if self.config.flip {
            image::imageops::flip_horizontal_in_place(&mut frame);
        }

        let size = frame.dimensions();
        if self.last_size != Some(size) {
            if let Some((w, h)) = self.last_size {
                tracing::info!(from_w = w, from_h = h, to_w = size.0, to_h = size.1, "Frame size changed");
            }
            self.handler.reset_baselines();
            self.last_size = Some(size);
        }

        self.handler.handle(&frame)
    }

    /// Run until stopped or the source ends. Consumes the loop; the camera is
    /// released on exit.
    pub fn run(mut self) {
        self.status.running.store(true, Ordering::Relaxed);
        self.open_camera();
        if !self.camera.is_open() {
            self.failures = self.config.max_failures;
        }

        let mut fps = FpsCounter::new(Instant::now());

        while !self.stopped() {
            if self.failures >= self.config.max_failures {
                self.reconnect();
                continue;
            }

            let frame = match self.camera.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Camera source ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, failures = self.failures + 1, "Frame read failed");
                    self.fail();
                    continue;
                }
            };
            self.failures = 0;
            self.status.connected.store(true, Ordering::Relaxed);

            if let Err(e) = self.process(frame) {
                tracing::error!(error = %e, "Frame processing failed");
                self.backoff();
                continue;
            }

            self.status.frames.fetch_add(1, Ordering::Relaxed);
            if let Some(rate) = fps.tick(Instant::now()) {
                self.status.fps.store(rate, Ordering::Relaxed);
                tracing::debug!(fps = rate, "Acquisition rate");
            }
        }

        self.camera.release();
        self.status.connected.store(false, Ordering::Relaxed);
        self.status.running.store(false, Ordering::Relaxed);
        tracing::info!("Acquisition loop stopped");
    }
}
