//! Runtime controls shared between HTTP handlers and the acquisition thread
//!
//! Toggles and sensitivity are atomics read once per frame. Cross-lines travel
//! as a versioned snapshot the acquisition thread applies when the version moves.

use crate::cross_line::CrossLine;
use crate::error::Error;
use crate::motion_detector::MotionDetectorConfig;
use parking_lot::RwLock;
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Switchable processing stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Motion,
    Face,
    CrossLine,
    Pipeline,
}

impl Feature {
    pub fn label(&self) -> &'static str {
        match self {
            Feature::Motion => "Motion detection",
            Feature::Face => "Face recognition",
            Feature::CrossLine => "Cross line detection",
            Feature::Pipeline => "Motion triggered recognition",
        }
    }
}

impl FromStr for Feature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motion" => Ok(Feature::Motion),
            "face" => Ok(Feature::Face),
            "crossline" => Ok(Feature::CrossLine),
            "pipeline" => Ok(Feature::Pipeline),
            other => Err(Error::NotFound(format!("unknown detection type: {}", other))),
        }
    }
}

/// Toggle values as read at the start of one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToggleSnapshot {
    pub motion: bool,
    pub face: bool,
    pub crossline: bool,
    pub pipeline: bool,
}

/// A line accepted from a configuration request, with its request position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcceptedLine {
    pub index: usize,
    pub line: CrossLine,
}

#[derive(Debug, Default)]
struct LineSnapshot {
    version: u64,
    lines: Arc<Vec<CrossLine>>,
}

pub struct PipelineControls {
    motion: AtomicBool,
    face: AtomicBool,
    crossline: AtomicBool,
    pipeline: AtomicBool,
    motion_threshold: AtomicU64,
    alarm_threshold: AtomicU32,
    sensitivity_version: AtomicU64,
    lines: RwLock<LineSnapshot>,
}

impl Default for PipelineControls {
    fn default() -> Self {
        Self::new(ToggleSnapshot::default(), &MotionDetectorConfig::default())
    }
}

impl PipelineControls {
    /// Create new PipelineControls
    pub fn new(toggles: ToggleSnapshot, motion: &MotionDetectorConfig) -> Self {
        Self {
            motion: AtomicBool::new(toggles.motion),
            face: AtomicBool::new(toggles.face),
            crossline: AtomicBool::new(toggles.crossline),
            pipeline: AtomicBool::new(toggles.pipeline),
            motion_threshold: AtomicU64::new(motion.motion_threshold),
            alarm_threshold: AtomicU32::new(motion.alarm_threshold),
            sensitivity_version: AtomicU64::new(0),
            lines: RwLock::new(LineSnapshot::default()),
        }
    }

    fn flag(&self, feature: Feature) -> &AtomicBool {
        match feature {
            Feature::Motion => &self.motion,
            Feature::Face => &self.face,
            Feature::CrossLine => &self.crossline,
            Feature::Pipeline => &self.pipeline,
        }
    }

    pub fn set_enabled(&self, feature: Feature, enabled: bool) {
        self.flag(feature).store(enabled, Ordering::Relaxed);
        tracing::info!(feature = ?feature, enabled, "Detection toggled");
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.flag(feature).load(Ordering::Relaxed)
    }

    pub fn toggles(&self) -> ToggleSnapshot {
        ToggleSnapshot {
            motion: self.is_enabled(Feature::Motion),
            face: self.is_enabled(Feature::Face),
            crossline: self.is_enabled(Feature::CrossLine),
            pipeline: self.is_enabled(Feature::Pipeline),
        }
    }

    pub fn set_sensitivity(&self, motion_threshold: u64, alarm_threshold: u32) {
        self.motion_threshold.store(motion_threshold, Ordering::Relaxed);
        self.alarm_threshold.store(alarm_threshold, Ordering::Relaxed);
        self.sensitivity_version.fetch_add(1, Ordering::Release);
    }

    /// `(version, motion_threshold, alarm_threshold)`
    pub fn sensitivity(&self) -> (u64, u64, u32) {
        let version = self.sensitivity_version.load(Ordering::Acquire);
        (
            version,
            self.motion_threshold.load(Ordering::Relaxed),
            self.alarm_threshold.load(Ordering::Relaxed),
        )
    }

    /// Replace all lines with those of `candidates` that fit `width` x `height`.
    /// An empty list clears the lines.
    pub fn replace_lines(&self, candidates: &[CrossLine], width: i32, height: i32) -> Vec<AcceptedLine> {
        let accepted: Vec<AcceptedLine> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, line)| {
                if line.fits(width, height) {
                    Some(AcceptedLine { index, line: *line })
                } else {
                    tracing::warn!(index, width, height, "Cross line out of range, skipped");
                    None
                }
            })
            .collect();

        let mut snapshot = self.lines.write();
        snapshot.version += 1;
        snapshot.lines = Arc::new(accepted.iter().map(|a| a.line).collect());
        tracing::info!(
            requested = candidates.len(),
            accepted = accepted.len(),
            "Cross lines configured"
        );
        accepted
    }

    /// `(version, lines)`; version 0 means never configured
    pub fn lines(&self) -> (u64, Arc<Vec<CrossLine>>) {
        let snapshot = self.lines.read();
        (snapshot.version, snapshot.lines.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Point;

    #[test]
    fn test_feature_parse() {
        assert_eq!("crossline".parse::<Feature>().unwrap(), Feature::CrossLine);
        assert!("eyes".parse::<Feature>().is_err());
    }

    #[test]
    fn test_toggles() {
        let controls = PipelineControls::default();
        assert_eq!(controls.toggles(), ToggleSnapshot::default());

        controls.set_enabled(Feature::Face, true);
        controls.set_enabled(Feature::Pipeline, true);
        let t = controls.toggles();
        assert!(t.face && t.pipeline && !t.motion && !t.crossline);
    }

    #[test]
    fn test_sensitivity_versioned() {
        let controls = PipelineControls::default();
        assert_eq!(controls.sensitivity(), (0, 10_000, 20));
        controls.set_sensitivity(500, 3);
        assert_eq!(controls.sensitivity(), (1, 500, 3));
    }

    #[test]
    fn test_replace_lines_validates_and_clears() {
        let controls = PipelineControls::default();
        let lines = [
            CrossLine::new(Point::new(0, 0), Point::new(640, 480)),
            CrossLine::new(Point::new(0, 0), Point::new(700, 10)),
            CrossLine::new(Point::new(10, 10), Point::new(20, 20)),
        ];

        let accepted = controls.replace_lines(&lines, 640, 480);
        assert_eq!(accepted.iter().map(|a| a.index).collect::<Vec<_>>(), vec![0, 2]);
        let (version, stored) = controls.lines();
        assert_eq!(version, 1);
        assert_eq!(stored.len(), 2);

        assert!(controls.replace_lines(&[], 640, 480).is_empty());
        let (version, stored) = controls.lines();
        assert_eq!(version, 2);
        assert!(stored.is_empty());
    }
}
