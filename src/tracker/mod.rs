//! Tracker - Multi-object Tracking Collaborator
//!
//! The pipeline only depends on the `Tracker` trait. `IouTracker` is a greedy
//! IoU association tracker: good enough for a single fixed camera.
//!
//! Trackers that feed one `IdentityResolver` must draw their ids from one
//! `TrackIdAllocator`, since the resolver caches names by id.

use crate::models::{Detection, Track, TrackId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Assigns stable ids to detections across frames
pub trait Tracker: Send {
    /// Feed this frame's detections; returns the tracks updated this frame
    fn update(&mut self, detections: &[Detection]) -> Vec<Track>;

    /// Ids dropped since the last call
    fn take_expired(&mut self) -> Vec<TrackId> {
        Vec::new()
    }
}

/// Process-wide source of track ids; clones share the counter
#[derive(Debug, Clone)]
pub struct TrackIdAllocator(Arc<AtomicU64>);

impl TrackIdAllocator {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub fn next_id(&self) -> TrackId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TrackIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct IouTrackerConfig {
    /// Minimum IoU for a detection to continue a track
    pub iou_threshold: f32,
    /// Frames a track survives without a matching detection
    pub max_age: u64,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_age: 30,
        }
    }
}

#[derive(Debug)]
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<Track>,
    ids: TrackIdAllocator,
    expired: Vec<TrackId>,
    frame: u64,
}

impl IouTracker {
    /// Create new IouTracker with its own id sequence
    pub fn new(config: IouTrackerConfig) -> Self {
        Self::with_ids(config, TrackIdAllocator::new())
    }

    /// Create new IouTracker drawing ids from a shared allocator
    pub fn with_ids(config: IouTrackerConfig, ids: TrackIdAllocator) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            ids,
            expired: Vec::new(),
            frame: 0,
        }
    }

    /// Tracks still alive (matched within `max_age` frames)
    pub fn live_tracks(&self) -> &[Track] {
        &self.tracks
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        self.frame += 1;

        // candidate pairs, best overlap first
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.iou_threshold {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        let mut updated = Vec::new();

        for (_, ti, di) in pairs {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.last_seen = self.frame;
            updated.push(*track);
        }

        for (di, det) in detections.iter().enumerate() {
            if det_used[di] || det.bbox.is_empty() {
                continue;
            }
            let track = Track {
                track_id: self.ids.next_id(),
                bbox: det.bbox,
                last_seen: self.frame,
            };
            self.tracks.push(track);
            updated.push(track);
        }

        let (frame, max_age) = (self.frame, self.config.max_age);
        let expired = &mut self.expired;
        self.tracks.retain(|t| {
            let alive = frame - t.last_seen <= max_age;
            if !alive {
                expired.push(t.track_id);
            }
            alive
        });

        updated.sort_by_key(|t| t.track_id);
        updated
    }

    fn take_expired(&mut self) -> Vec<TrackId> {
        std::mem::take(&mut self.expired)
    }
}
