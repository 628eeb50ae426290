//! MotionDetector - Frame Differencing with Debounced Alarm
//!
//! ## Responsibilities
//!
//! - Compare each frame against the previous blurred grayscale frame
//! - Debounce via a decaying counter so single noisy frames never alarm
//! - Outline changed regions on the returned frame
//! - Raise a "motion detected" alarm on the debounced transition
//!
//! ## Score
//!
//! `score` is the sum of the dilated binary difference mask (pixels are 0 or 255),
//! so `motion_threshold` is expressed in those units.

use crate::alarm_dispatcher::AlarmDispatcher;
use crate::annotate::{self, GREEN};
use crate::models::{BBox, Frame};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use std::sync::Arc;

/// Alarm text raised on the debounced transition
pub const MOTION_ALARM_MESSAGE: &str = "Motion detector: movement detected";

/// Detector tuning
#[derive(Debug, Clone)]
pub struct MotionDetectorConfig {
    /// Per-pixel delta above which a pixel counts as changed
    pub color_threshold: u8,
    /// Mask score above which a frame counts as "moving"
    pub motion_threshold: u64,
    /// Counter value above which motion is reported
    pub alarm_threshold: u32,
    /// Minimum contour area to outline
    pub min_area: f64,
    /// Gaussian sigma for the pre-blur (about a 21x21 kernel)
    pub blur_sigma: f32,
    /// Dilation radius applied to the binary mask
    pub dilate_radius: u8,
}

impl Default for MotionDetectorConfig {
    fn default() -> Self {
        Self {
            color_threshold: 25,
            motion_threshold: 10_000,
            alarm_threshold: 20,
            min_area: 500.0,
            blur_sigma: 3.5,
            dilate_radius: 2,
        }
    }
}

/// Per-frame result
#[derive(Debug, Clone)]
pub struct MotionOutcome {
    /// True only on the frame where the debounced counter crossed the alarm threshold
    pub detected: bool,
    /// Input frame with changed regions outlined
    pub frame: Frame,
    /// Binary difference mask, absent on the first frame after a reset
    pub mask: Option<GrayImage>,
    pub score: u64,
    pub counter: u32,
}

/// Stateful motion detector, owned by the perception thread
pub struct MotionDetector {
    config: MotionDetectorConfig,
    previous: Option<GrayImage>,
    counter: u32,
    /// Alarms raised since construction
    trigger_seq: u64,
    alarms: Option<Arc<AlarmDispatcher>>,
}

impl MotionDetector {
    /// Create new MotionDetector
    pub fn new(config: MotionDetectorConfig, alarms: Option<Arc<AlarmDispatcher>>) -> Self {
        Self {
            config,
            previous: None,
            counter: 0,
            trigger_seq: 0,
            alarms,
        }
    }

    pub fn config(&self) -> &MotionDetectorConfig {
        &self.config
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_seq
    }

    /// Update the two sensitivity knobs
    pub fn set_sensitivity(&mut self, motion_threshold: u64, alarm_threshold: u32) {
        tracing::info!(
            motion_threshold,
            alarm_threshold,
            "Motion sensitivity updated"
        );
        self.config.motion_threshold = motion_threshold;
        self.config.alarm_threshold = alarm_threshold;
    }

    /// Forget the previous frame and reset the counter
    pub fn reset_baseline(&mut self) {
        self.previous = None;
        self.counter = 0;
    }

    /// Process one frame
    pub fn detect(&mut self, frame: &Frame) -> MotionOutcome {
        let gray = image::imageops::grayscale(frame);
        let blurred = gaussian_blur_f32(&gray, self.config.blur_sigma);

        let previous = match self.previous.replace(blurred) {
            Some(prev) if prev.dimensions() == frame.dimensions() => prev,
            Some(_) => {
                tracing::debug!("Motion baseline size changed, re-seeding");
                self.counter = 0;
                return self.idle(frame);
            }
            None => return self.idle(frame),
        };
        let Some(current) = self.previous.as_ref() else {
            return self.idle(frame);
        };

        let delta = abs_diff(&previous, current);
        let binary = threshold(&delta, self.config.color_threshold, ThresholdType::Binary);
        let mask = dilate(&binary, Norm::LInf, self.config.dilate_radius);
        let score: u64 = mask.pixels().map(|p| p[0] as u64).sum();

        let detected = self.register_score(score);

        let mut annotated = frame.clone();
        for bbox in changed_regions(&mask, self.config.min_area) {
            annotate::draw_box(&mut annotated, &bbox, GREEN, 2);
        }

        if detected {
            self.trigger_seq += 1;
            tracing::info!(score, trigger_seq = self.trigger_seq, "Motion detected");
            if let Some(alarms) = &self.alarms {
                alarms.fire(&annotated, MOTION_ALARM_MESSAGE);
            }
        }

        MotionOutcome {
            detected,
            frame: annotated,
            mask: Some(mask),
            score,
            counter: self.counter,
        }
    }

    /// Feed one score into the debounce counter; true on the transition frame
    fn register_score(&mut self, score: u64) -> bool {
        if score > self.config.motion_threshold {
            self.counter += 1;
        } else if self.counter > 0 {
            self.counter -= 1;
        }

        if self.counter > self.config.alarm_threshold {
            self.counter = 0;
            return true;
        }
        false
    }

    fn idle(&self, frame: &Frame) -> MotionOutcome {
        MotionOutcome {
            detected: false,
            frame: frame.clone(),
            mask: None,
            score: 0,
            counter: self.counter,
        }
    }
}

fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    ImageBuffer::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].abs_diff(b.get_pixel(x, y)[0])])
    })
}

/// Bounding boxes of outer contours whose area is at least `min_area`
fn changed_regions(mask: &GrayImage, min_area: f64) -> Vec<BBox> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter(|c| polygon_area(&c.points) >= min_area)
        .filter_map(|c| {
            let xs = c.points.iter().map(|p| p.x);
            let ys = c.points.iter().map(|p| p.y);
            Some(BBox::new(
                xs.clone().min()?,
                ys.clone().min()?,
                xs.max()? + 1,
                ys.max()? + 1,
            ))
        })
        .collect()
}

/// Shoelace area of a closed contour
fn polygon_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice.abs() as f64) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn detector(alarm_threshold: u32) -> MotionDetector {
        MotionDetector::new(
            MotionDetectorConfig {
                alarm_threshold,
                ..Default::default()
            },
            None,
        )
    }

    #[test]
    fn test_sustained_motion_fires_once_then_resets() {
        let mut det = detector(20);
        let hits: Vec<bool> = (0..21).map(|_| det.register_score(50_000)).collect();

        assert!(hits[..20].iter().all(|h| !h));
        assert!(hits[20]);
        assert_eq!(det.counter(), 0);
    }

    #[test]
    fn test_isolated_spikes_never_fire() {
        let mut det = detector(3);
        for _ in 0..100 {
            assert!(!det.register_score(50_000));
            assert!(!det.register_score(0));
        }
        assert!(det.counter() <= 1);
    }

    #[test]
    fn test_counter_decays_to_zero_floor() {
        let mut det = detector(20);
        det.register_score(50_000);
        det.register_score(50_000);
        for _ in 0..5 {
            det.register_score(0);
        }
        assert_eq!(det.counter(), 0);
    }

    #[test]
    fn test_first_frame_seeds_baseline() {
        let mut det = detector(0);
        let frame = Frame::from_pixel(64, 48, Rgb([0, 0, 0]));

        let out = det.detect(&frame);
        assert!(!out.detected);
        assert!(out.mask.is_none());
        assert_eq!(out.score, 0);
    }

    #[test]
    fn test_change_produces_mask_and_detection() {
        let mut det = MotionDetector::new(
            MotionDetectorConfig {
                alarm_threshold: 0,
                motion_threshold: 1_000,
                min_area: 50.0,
                ..Default::default()
            },
            None,
        );

        let dark = Frame::from_pixel(80, 60, Rgb([0, 0, 0]));
        let mut bright = dark.clone();
        for y in 20..40 {
            for x in 30..50 {
                bright.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        det.detect(&dark);
        let out = det.detect(&bright);

        assert!(out.score > 1_000);
        assert!(out.detected);
        assert_eq!(det.trigger_count(), 1);
        assert!(out.mask.is_some());
        assert_eq!(det.counter(), 0);
        // an outline was drawn somewhere around the changed block
        assert!(out.frame.pixels().any(|p| *p == GREEN));
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let mut det = detector(0);
        let frame = Frame::from_pixel(32, 32, Rgb([90, 90, 90]));
        det.detect(&frame);
        let out = det.detect(&frame);
        assert_eq!(out.score, 0);
        assert!(!out.detected);
    }

    #[test]
    fn test_reset_baseline_and_size_change() {
        let mut det = detector(0);
        det.detect(&Frame::new(32, 32));
        det.reset_baseline();
        assert!(det.detect(&Frame::new(32, 32)).mask.is_none());

        let out = det.detect(&Frame::new(64, 32));
        assert!(out.mask.is_none());
    }

    #[test]
    fn test_set_sensitivity() {
        let mut det = detector(20);
        det.set_sensitivity(5, 1);
        assert_eq!(det.config().motion_threshold, 5);
        assert!(!det.register_score(6));
        assert!(det.register_score(6));
    }

    #[test]
    fn test_polygon_area_square() {
        use imageproc::point::Point;
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
    }
}
