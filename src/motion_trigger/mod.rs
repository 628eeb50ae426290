//! MotionTriggeredStateMachine - Motion-gated Person Recognition
//!
//! ## Responsibilities
//!
//! - Stay in `MotionDetected` (cheap monitoring) until the motion detector fires
//! - In `PersonDetected`, run person detection, tracking and identity resolution
//! - Fall back to `MotionDetected` as soon as no person box is found
//! - Remember confirmed names per track until the tracker drops the track
//!
//! ## States
//!
//! ```text
//! MotionDetected --motion--> PersonDetected --no persons--> MotionDetected
//! ```

use crate::annotate::{self, GREEN};
use crate::error::Result;
use crate::identity::{IdentityResolver, Resolution, UNKNOWN};
use crate::inference_client::PersonDetector;
use crate::models::{BBox, Frame, TrackId};
use crate::motion_detector::MotionDetector;
use crate::tracker::Tracker;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerState {
    MotionDetected,
    PersonDetected,
}

/// Overlay flags for the current frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerFlags {
    pub motion: bool,
    pub person: bool,
    /// Some track resolved to something other than Unknown
    pub face: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineObservation {
    pub track_id: TrackId,
    pub name: String,
    pub bbox: BBox,
}

pub struct MotionTriggeredStateMachine {
    state: TriggerState,
    motion: MotionDetector,
    persons: Arc<dyn PersonDetector>,
    tracker: Box<dyn Tracker>,
    small_factor: f32,
    names: HashMap<TrackId, String>,
    flags: TriggerFlags,
}

impl MotionTriggeredStateMachine {
    /// Create new MotionTriggeredStateMachine in `MotionDetected`
    pub fn new(motion: MotionDetector, persons: Arc<dyn PersonDetector>, tracker: Box<dyn Tracker>) -> Self {
        Self {
            state: TriggerState::MotionDetected,
            motion,
            persons,
            tracker,
            small_factor: 0.5,
            names: HashMap::new(),
            flags: TriggerFlags::default(),
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn flags(&self) -> TriggerFlags {
        self.flags
    }

    pub fn motion_detector_mut(&mut self) -> &mut MotionDetector {
        &mut self.motion
    }

    pub fn cached_name(&self, track_id: TrackId) -> Option<&str> {
        self.names.get(&track_id).map(String::as_str)
    }

    /// Advance one frame
    pub fn step(&mut self, frame: &Frame, resolver: &mut IdentityResolver) -> Result<Vec<PipelineObservation>> {
        self.flags = TriggerFlags::default();

        match self.state {
            TriggerState::MotionDetected => {
                if self.motion.detect(frame).detected {
                    tracing::info!("Motion trigger: person detection engaged");
                    self.state = TriggerState::PersonDetected;
                }
                Ok(Vec::new())
            }
            TriggerState::PersonDetected => {
                self.flags.motion = true;

                let boxes = self.persons.detect_persons(frame)?;
                if boxes.is_empty() {
                    tracing::info!("Motion trigger: no persons, back to monitoring");
                    self.state = TriggerState::MotionDetected;
                    return Ok(Vec::new());
                }
                self.flags.person = true;

                let tracks = self.tracker.update(&boxes);
                for track_id in self.tracker.take_expired() {
                    self.names.remove(&track_id);
                    resolver.forget(track_id);
                }
                let mut observations = Vec::with_capacity(tracks.len());
                for track in tracks {
                    let name = self.name_for(track.track_id, &track.bbox, frame, resolver)?;
                    if name != UNKNOWN {
                        self.flags.face = true;
                    }
                    observations.push(PipelineObservation {
                        track_id: track.track_id,
                        name,
                        bbox: track.bbox,
                    });
                }
                Ok(observations)
            }
        }
    }

    fn name_for(
        &mut self,
        track_id: TrackId,
        bbox: &BBox,
        frame: &Frame,
        resolver: &mut IdentityResolver,
    ) -> Result<String> {
        if let Some(name) = self.names.get(&track_id) {
            return Ok(name.clone());
        }
        let Some(crop) = annotate::crop(frame, bbox) else {
            return Ok(UNKNOWN.to_string());
        };
        let small_crop = annotate::resize(&crop, self.small_factor);

        let resolution = resolver.resolve(track_id, &small_crop, &crop)?;
        if let Resolution::Confirmed(name) = &resolution {
            self.names.insert(track_id, name.clone());
        }
        Ok(resolution.to_string())
    }

    /// Boxes plus motion/person/face flag squares
    pub fn draw(&self, frame: &mut Frame, observations: &[PipelineObservation]) {
        annotate::draw_flags(frame, &[self.flags.motion, self.flags.person, self.flags.face]);
        for obs in observations {
            annotate::draw_box(frame, &obs.bbox, GREEN, 2);
        }
    }

    /// Forget the motion baseline (resolution change)
    pub fn reset_baseline(&mut self) {
        self.motion.reset_baseline();
    }
}
