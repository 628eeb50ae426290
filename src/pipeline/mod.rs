//! FrameDispatcher - Per-frame Pipeline Dispatch
//!
//! ## Responsibilities
//!
//! - Apply pending runtime control changes (sensitivity, cross-lines)
//! - Route each frame through the enabled stages in a fixed order
//! - Publish every stage's annotated frame and info record to the StateStore
//!
//! ## Stage Order
//!
//! 1. Motion detection -> `motion`
//! 2. Face recognition -> `face` (also runs when only cross-line is enabled)
//! 3. Cross-line over face tracks -> `crossline`
//! 4. Motion-triggered recognition -> `pipeline`
//! 5. Raw frame -> `current`
//!
//! All stage state is owned here and touched only by the acquisition thread.
//! The face stage and the trigger share one `IdentityResolver`, so their
//! trackers must draw ids from one `TrackIdAllocator`.

pub mod controls;
pub mod face_stage;

pub use controls::{AcceptedLine, Feature, PipelineControls, ToggleSnapshot};
pub use face_stage::{FaceObservation, FaceRecognitionStage};

use crate::annotate::{self, BLUE};
use crate::cross_line::CrossLineTracker;
use crate::error::Result;
use crate::identity::IdentityResolver;
use crate::models::Frame;
use crate::motion_detector::MotionDetector;
use crate::motion_trigger::MotionTriggeredStateMachine;
use crate::state_store::{Channel, StateStore};
use std::sync::Arc;

pub struct FrameDispatcher {
    store: Arc<StateStore>,
    controls: Arc<PipelineControls>,
    motion: MotionDetector,
    faces: FaceRecognitionStage,
    resolver: IdentityResolver,
    cross_lines: CrossLineTracker,
    trigger: MotionTriggeredStateMachine,
    sensitivity_version: u64,
    lines_version: u64,
}

impl FrameDispatcher {
    /// Create new FrameDispatcher
    pub fn new(
        store: Arc<StateStore>,
        controls: Arc<PipelineControls>,
        motion: MotionDetector,
        faces: FaceRecognitionStage,
        resolver: IdentityResolver,
        trigger: MotionTriggeredStateMachine,
    ) -> Self {
        Self {
            store,
            controls,
            motion,
            faces,
            resolver,
            cross_lines: CrossLineTracker::new(),
            trigger,
            sensitivity_version: 0,
            lines_version: 0,
        }
    }

    pub fn cross_lines(&self) -> &CrossLineTracker {
        &self.cross_lines
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn motion_detector(&self) -> &MotionDetector {
        &self.motion
    }

    /// Invalidate frame-size dependent state
    pub fn reset_baselines(&mut self) {
        self.motion.reset_baseline();
        self.trigger.reset_baseline();
    }

    fn apply_controls(&mut self) {
        let (version, motion_threshold, alarm_threshold) = self.controls.sensitivity();
        if version != self.sensitivity_version {
            self.sensitivity_version = version;
            self.motion.set_sensitivity(motion_threshold, alarm_threshold);
            self.trigger
                .motion_detector_mut()
                .set_sensitivity(motion_threshold, alarm_threshold);
        }

        let (version, lines) = self.controls.lines();
        if version != self.lines_version {
            self.lines_version = version;
            self.cross_lines.set_lines(lines.as_ref().clone());
        }
    }

    /// Run all enabled stages on one frame
    pub fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        self.apply_controls();
        let toggles = self.controls.toggles();

        if toggles.motion {
            let outcome = self.motion.detect(frame);
            self.store.publish(Channel::Motion, &outcome.frame);
            self.store.record_motion(outcome.detected);
        }

        if toggles.face || toggles.crossline {
            let observations = self.faces.recognize(frame, &mut self.resolver)?;
            for track_id in self.faces.take_expired() {
                self.cross_lines.forget(track_id);
                self.resolver.forget(track_id);
            }
            let names: Vec<String> = observations
                .iter()
                .map(|o| o.resolution.to_string())
                .collect();

            let mut face_frame = frame.clone();
            FaceRecognitionStage::draw(&mut face_frame, &observations);
            self.store.publish(Channel::Face, &face_frame);
            self.store.record_faces(names.as_slice());

            if toggles.crossline {
                let mut crossline_frame = frame.clone();
                for (obs, name) in observations.iter().zip(&names) {
                    let center = obs.bbox.center();
                    annotate::draw_dot(&mut crossline_frame, center, 5, BLUE);
                    if self.cross_lines.is_cross_line(center, obs.track_id) {
                        tracing::info!(
                            track_id = obs.track_id,
                            name = %name,
                            x = center.x,
                            y = center.y,
                            "Cross line detected"
                        );
                        self.store.record_crossing(name);
                    }
                }
                self.cross_lines.draw(&mut crossline_frame);
                self.store.publish(Channel::CrossLine, &crossline_frame);
            }
        }

        if toggles.pipeline {
            let observations = self.trigger.step(frame, &mut self.resolver)?;
            let mut pipeline_frame = frame.clone();
            self.trigger.draw(&mut pipeline_frame, &observations);
            self.store.publish(Channel::Pipeline, &pipeline_frame);
            if !observations.is_empty() {
                let names: Vec<&str> = observations.iter().map(|o| o.name.as_str()).collect();
                self.store.record_persons(names.as_slice());
            }
        }

        self.store.publish(Channel::Current, frame);
        Ok(())
    }
}
