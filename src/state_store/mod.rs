//! StateStore - Latest-value Publish/Subscribe Store
//!
//! ## Responsibilities
//!
//! - Hold the latest frame of each channel and the latest info record of each feature
//! - One lock per channel and per info record: writers on different channels never contend
//! - Whole-value replacement so readers never observe a partial write
//!
//! ## Concurrency
//!
//! The acquisition thread is the only writer. HTTP handlers read. Frames are
//! copied into a fresh `Arc` on publish; readers clone the `Arc` and encode
//! outside the lock.

use crate::annotate::encode_jpeg;
use crate::error::{Error, Result};
use crate::models::Frame;
use chrono::Local;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Timestamp format of every `lastDetection` field
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Frame channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Current,
    Motion,
    Face,
    CrossLine,
    Pipeline,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Current,
        Channel::Motion,
        Channel::Face,
        Channel::CrossLine,
        Channel::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Current => "current",
            Channel::Motion => "motion",
            Channel::Face => "face",
            Channel::CrossLine => "crossline",
            Channel::Pipeline => "pipeline",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::NotFound(format!("unknown stream: {}", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionInfo {
    pub last_detection: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceInfo {
    pub face_count: usize,
    /// Comma-joined display names
    pub face_names: String,
    pub last_detection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossLineInfo {
    /// Who crossed (display name of the last crossing track)
    pub crossing_event: String,
    pub last_detection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInfo {
    pub person_count: usize,
    pub person_names: String,
    pub last_detection: String,
}

/// Which info record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Motion,
    Face,
    CrossLine,
    Pipeline,
}

/// A complete info record, replacing the previous one on publish
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoRecord {
    Motion(MotionInfo),
    Face(FaceInfo),
    CrossLine(CrossLineInfo),
    Pipeline(PipelineInfo),
}

pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub struct StateStore {
    frames: [RwLock<Option<Arc<Frame>>>; 5],
    motion: RwLock<MotionInfo>,
    face: RwLock<FaceInfo>,
    crossline: RwLock<CrossLineInfo>,
    pipeline: RwLock<PipelineInfo>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create new StateStore with every channel empty
    pub fn new() -> Self {
        Self {
            frames: std::array::from_fn(|_| RwLock::new(None)),
            motion: RwLock::new(MotionInfo::default()),
            face: RwLock::new(FaceInfo::default()),
            crossline: RwLock::new(CrossLineInfo::default()),
            pipeline: RwLock::new(PipelineInfo::default()),
        }
    }

    /// Replace the channel's frame with a copy of `frame`
    pub fn publish(&self, channel: Channel, frame: &Frame) {
        let copy = Arc::new(frame.clone());
        *self.frames[channel.slot()].write() = Some(copy);
    }

    /// Latest frame, `None` before the first publish
    pub fn latest(&self, channel: Channel) -> Option<Arc<Frame>> {
        self.frames[channel.slot()].read().clone()
    }

    /// Run `f` while holding the channel's read lock
    pub fn with_latest<R>(&self, channel: Channel, f: impl FnOnce(Option<&Frame>) -> R) -> R {
        let guard = self.frames[channel.slot()].read();
        f(guard.as_deref())
    }

    /// Latest frame as JPEG, encoded outside the lock
    pub fn latest_jpeg(&self, channel: Channel) -> Result<Option<Vec<u8>>> {
        match self.latest(channel) {
            Some(frame) => Ok(Some(encode_jpeg(&frame)?)),
            None => Ok(None),
        }
    }

    pub fn publish_info(&self, record: InfoRecord) {
        match record {
            InfoRecord::Motion(info) => *self.motion.write() = info,
            InfoRecord::Face(info) => *self.face.write() = info,
            InfoRecord::CrossLine(info) => *self.crossline.write() = info,
            InfoRecord::Pipeline(info) => *self.pipeline.write() = info,
        }
    }

    pub fn latest_info(&self, kind: InfoKind) -> InfoRecord {
        match kind {
            InfoKind::Motion => InfoRecord::Motion(self.motion_info()),
            InfoKind::Face => InfoRecord::Face(self.face_info()),
            InfoKind::CrossLine => InfoRecord::CrossLine(self.crossline_info()),
            InfoKind::Pipeline => InfoRecord::Pipeline(self.pipeline_info()),
        }
    }

    pub fn motion_info(&self) -> MotionInfo {
        self.motion.read().clone()
    }

    pub fn face_info(&self) -> FaceInfo {
        self.face.read().clone()
    }

    pub fn crossline_info(&self) -> CrossLineInfo {
        self.crossline.read().clone()
    }

    pub fn pipeline_info(&self) -> PipelineInfo {
        self.pipeline.read().clone()
    }

    /// Stamp the motion record, only when motion was detected
    pub fn record_motion(&self, detected: bool) {
        if detected {
            self.publish_info(InfoRecord::Motion(MotionInfo {
                last_detection: Some(now_timestamp()),
            }));
        }
    }

    /// Replace the face record with this frame's names
    pub fn record_faces<S: AsRef<str>>(&self, names: &[S]) {
        self.publish_info(InfoRecord::Face(FaceInfo {
            face_count: names.len(),
            face_names: join_names(names),
            last_detection: now_timestamp(),
        }));
    }

    /// Record a crossing; empty events are ignored
    pub fn record_crossing(&self, event: &str) {
        if event.is_empty() {
            return;
        }
        self.publish_info(InfoRecord::CrossLine(CrossLineInfo {
            crossing_event: event.to_string(),
            last_detection: now_timestamp(),
        }));
    }

    pub fn record_persons<S: AsRef<str>>(&self, names: &[S]) {
        self.publish_info(InfoRecord::Pipeline(PipelineInfo {
            person_count: names.len(),
            person_names: join_names(names),
            last_detection: now_timestamp(),
        }));
    }
}

fn join_names<S: AsRef<str>>(names: &[S]) -> String {
    names.iter().map(|n| n.as_ref()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_channel_parse() {
        assert_eq!("crossline".parse::<Channel>().unwrap(), Channel::CrossLine);
        assert_eq!("pipeline".parse::<Channel>().unwrap(), Channel::Pipeline);
        assert!(matches!("bogus".parse::<Channel>(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_latest_empty_before_publish() {
        let store = StateStore::new();
        for channel in Channel::ALL {
            assert!(store.latest(channel).is_none());
            assert!(store.latest_jpeg(channel).unwrap().is_none());
        }
    }

    #[test]
    fn test_publish_copies_frame() {
        let store = StateStore::new();
        let mut frame = Frame::from_pixel(4, 4, Rgb([1, 2, 3]));
        store.publish(Channel::Face, &frame);
        frame.put_pixel(0, 0, Rgb([9, 9, 9]));

        let stored = store.latest(Channel::Face).unwrap();
        assert_eq!(*stored.get_pixel(0, 0), Rgb([1, 2, 3]));
        assert!(store.latest(Channel::Current).is_none());
    }

    #[test]
    fn test_info_records() {
        let store = StateStore::new();
        assert_eq!(store.motion_info().last_detection, None);

        store.record_motion(false);
        assert_eq!(store.motion_info().last_detection, None);
        store.record_motion(true);
        assert!(store.motion_info().last_detection.is_some());

        store.record_faces(&["Alice", "Unknown"]);
        let face = store.face_info();
        assert_eq!(face.face_count, 2);
        assert_eq!(face.face_names, "Alice, Unknown");

        store.record_crossing("");
        assert_eq!(store.crossline_info().crossing_event, "");
        store.record_crossing("Alice");
        assert_eq!(store.crossline_info().crossing_event, "Alice");

        store.record_persons::<String>(&[]);
        assert_eq!(
            store.latest_info(InfoKind::Pipeline),
            InfoRecord::Pipeline(PipelineInfo {
                person_count: 0,
                person_names: String::new(),
                last_detection: store.pipeline_info().last_detection,
            })
        );
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let json = serde_json::to_value(FaceInfo::default()).unwrap();
        assert!(json.get("faceCount").is_some());
        assert!(json.get("faceNames").is_some());
        assert!(json.get("lastDetection").is_some());

        let json = serde_json::to_value(InfoRecord::CrossLine(CrossLineInfo::default())).unwrap();
        assert!(json.get("crossingEvent").is_some());
    }

    #[test]
    fn test_slow_reader_does_not_block_other_channel() {
        let store = Arc::new(StateStore::new());
        store.publish(Channel::Current, &Frame::new(8, 8));

        let holding = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let holding = holding.clone();
            thread::spawn(move || {
                store.with_latest(Channel::Current, |_| {
                    holding.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(300));
                })
            })
        };
        while !holding.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let start = Instant::now();
        store.publish(Channel::Motion, &Frame::new(8, 8));
        store.record_faces(&["Alice"]);
        assert!(start.elapsed() < Duration::from_millis(150));

        reader.join().unwrap();
    }

    #[test]
    fn test_readers_never_see_torn_frames() {
        let store = Arc::new(StateStore::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = store.clone();
            let done = done.clone();
            thread::spawn(move || {
                for i in 0..200u32 {
                    let shade = (i % 256) as u8;
                    store.publish(Channel::Current, &Frame::from_pixel(32, 32, Rgb([shade; 3])));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let done = done.clone();
                thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        if let Some(frame) = store.latest(Channel::Current) {
                            let first = *frame.get_pixel(0, 0);
                            assert!(frame.pixels().all(|p| *p == first));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
