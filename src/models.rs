//! Shared models and types
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A captured camera frame (RGB, 8 bits per channel)
pub type Frame = RgbImage;

/// Tracker-assigned identifier, stable for the lifetime of a tracked entity
pub type TrackId = u64;

/// 2D point in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box `(x1, y1)`-`(x2, y2)`, exclusive on the far edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Integer centre, as used for line-crossing tests
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// Clamp to an image of `width` x `height`
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    /// Map coordinates from a frame resized by `factor` back to the original frame
    pub fn unscale(&self, factor: f32) -> Self {
        Self {
            x1: (self.x1 as f32 / factor) as i32,
            y1: (self.y1 as f32 / factor) as i32,
            x2: (self.x2 as f32 / factor) as i32,
            y2: (self.y2 as f32 / factor) as i32,
        }
    }

    /// Intersection over union
    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = BBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        let inter_area = inter.area();
        let union = self.area() + other.area() - inter_area;
        if union <= 0 {
            return 0.0;
        }
        inter_area as f32 / union as f32
    }
}

/// Raw detection produced by a detector collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub score: f32,
}

/// Tracked entity produced by the tracker collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub track_id: TrackId,
    pub bbox: BBox,
    /// Tracker frame counter at the last matched detection
    pub last_seen: u64,
}

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Service status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub camera_connected: bool,
    pub fps: u32,
    pub frames: u64,
    pub reconnects: u64,
    pub alarms_queued: u64,
    pub alarms_dropped: u64,
    pub version: String,
    pub motion_enabled: bool,
    pub face_enabled: bool,
    pub crossline_enabled: bool,
    pub pipeline_enabled: bool,
}
