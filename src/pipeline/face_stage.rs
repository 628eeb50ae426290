//! Face recognition stage: downscale, detect faces, track, resolve identities

use crate::annotate::{self, GREEN};
use crate::error::Result;
use crate::identity::{IdentityResolver, Resolution};
use crate::inference_client::FaceAnalyzer;
use crate::models::{BBox, Detection, Frame, TrackId};
use crate::tracker::Tracker;
use std::sync::Arc;

/// One tracked face in full-resolution coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub track_id: TrackId,
    pub bbox: BBox,
    pub resolution: Resolution,
}

pub struct FaceRecognitionStage {
    resize_factor: f32,
    analyzer: Arc<dyn FaceAnalyzer>,
    tracker: Box<dyn Tracker>,
}

impl FaceRecognitionStage {
    /// Create new FaceRecognitionStage (`resize_factor` 0.5 halves the frame for detection)
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>, tracker: Box<dyn Tracker>, resize_factor: f32) -> Self {
        Self {
            resize_factor,
            analyzer,
            tracker,
        }
    }

    pub fn recognize(&mut self, frame: &Frame, resolver: &mut IdentityResolver) -> Result<Vec<FaceObservation>> {
        let small = annotate::resize(frame, self.resize_factor);

        let detections: Vec<Detection> = self
            .analyzer
            .detect_faces(&small)?
            .into_iter()
            .map(|f| Detection {
                bbox: f.bbox,
                score: f.score,
            })
            .collect();
        let tracks = self.tracker.update(&detections);

        let mut observations = Vec::with_capacity(tracks.len());
        for track in tracks {
            let full_bbox = track
                .bbox
                .unscale(self.resize_factor)
                .clamp(frame.width(), frame.height());
            let (Some(small_crop), Some(crop)) = (
                annotate::crop(&small, &track.bbox),
                annotate::crop(frame, &full_bbox),
            ) else {
                continue;
            };

            let resolution = resolver.resolve(track.track_id, &small_crop, &crop)?;
            observations.push(FaceObservation {
                track_id: track.track_id,
                bbox: track.bbox.unscale(self.resize_factor),
                resolution,
            });
        }
        Ok(observations)
    }

    /// Face tracks dropped by the tracker since the last call
    pub fn take_expired(&mut self) -> Vec<TrackId> {
        self.tracker.take_expired()
    }

    pub fn draw(frame: &mut Frame, observations: &[FaceObservation]) {
        for obs in observations {
            annotate::draw_corner_brackets(frame, &obs.bbox, GREEN);
        }
    }
}
