//! SelfLearningCache - Gallery Growth from Repeated Sightings
//!
//! ## Responsibilities
//!
//! - Accumulate (distance, crop) samples per track for a single candidate name
//! - Restart the record when the candidate changes
//! - Promote after `consecutive_count` samples: persist the best crop into the
//!   gallery and return `Promoted` so the owner reloads its index
//!
//! Promotion is immediate and irreversible.

use crate::annotate::encode_png;
use crate::error::{Error, Result};
use crate::models::{Frame, TrackId};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SelfLearningConfig {
    /// Samples required before promotion
    pub consecutive_count: usize,
}

impl Default for SelfLearningConfig {
    fn default() -> Self {
        Self {
            consecutive_count: 5,
        }
    }
}

/// Evidence for one track
#[derive(Debug, Clone)]
pub struct LearningRecord {
    pub candidate: String,
    pub samples: Vec<(f32, Frame)>,
}

impl LearningRecord {
    fn new(candidate: &str, distance: f32, crop: &Frame) -> Self {
        Self {
            candidate: candidate.to_string(),
            samples: vec![(distance, crop.clone())],
        }
    }
}

/// A sample written into the gallery
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub track_id: TrackId,
    pub candidate: String,
    pub distance: f32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LearningOutcome {
    Started,
    Accumulated { count: usize },
    /// Candidate changed; previous evidence discarded
    Restarted { previous: String },
    /// Gallery changed on disk; reload required
    Promoted(Promotion),
}

pub struct SelfLearningCache {
    root: PathBuf,
    config: SelfLearningConfig,
    records: HashMap<TrackId, LearningRecord>,
}

impl SelfLearningCache {
    /// Create new SelfLearningCache writing into the gallery at `root`
    pub fn new(root: impl Into<PathBuf>, config: SelfLearningConfig) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(Error::Config(
                "self-learning requires a known faces directory".to_string(),
            ));
        }
        Ok(Self {
            root,
            config,
            records: HashMap::new(),
        })
    }

    pub fn is_learning(&self, track_id: TrackId) -> bool {
        self.records.contains_key(&track_id)
    }

    pub fn candidate(&self, track_id: TrackId) -> Option<&str> {
        self.records.get(&track_id).map(|r| r.candidate.as_str())
    }

    pub fn record(&self, track_id: TrackId) -> Option<&LearningRecord> {
        self.records.get(&track_id)
    }

    /// Discard a track's unpromoted samples
    pub fn forget(&mut self, track_id: TrackId) {
        if let Some(record) = self.records.remove(&track_id) {
            tracing::debug!(
                track_id,
                candidate = %record.candidate,
                samples = record.samples.len(),
                "Learning record dropped"
            );
        }
    }

    /// Add one sample for `track_id`
    pub fn observe(
        &mut self,
        track_id: TrackId,
        candidate: &str,
        distance: f32,
        crop: &Frame,
    ) -> Result<LearningOutcome> {
        let outcome = match self.records.get_mut(&track_id) {
            None => {
                self.records
                    .insert(track_id, LearningRecord::new(candidate, distance, crop));
                tracing::info!(track_id, candidate, distance, "Learning started");
                LearningOutcome::Started
            }
            Some(record) if record.candidate == candidate => {
                record.samples.push((distance, crop.clone()));
                LearningOutcome::Accumulated {
                    count: record.samples.len(),
                }
            }
            Some(record) => {
                let previous = std::mem::replace(
                    record,
                    LearningRecord::new(candidate, distance, crop),
                )
                .candidate;
                tracing::info!(
                    track_id,
                    previous = %previous,
                    candidate,
                    "Learning candidate changed, restarting"
                );
                LearningOutcome::Restarted { previous }
            }
        };

        let ready = self
            .records
            .get(&track_id)
            .is_some_and(|r| r.samples.len() >= self.config.consecutive_count);
        if ready {
            return self.promote(track_id).map(LearningOutcome::Promoted);
        }
        Ok(outcome)
    }

    /// Drop the record and persist its minimum-distance crop
    fn promote(&mut self, track_id: TrackId) -> Result<Promotion> {
        let record = self
            .records
            .remove(&track_id)
            .ok_or_else(|| Error::Internal(format!("no learning record for track {}", track_id)))?;

        let (distance, crop) = record
            .samples
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .ok_or_else(|| Error::Internal("empty learning record".to_string()))?;

        let dir = self.root.join(&record.candidate);
        std::fs::create_dir_all(&dir)?;
        let path = unique_sample_path(&dir, track_id);
        std::fs::write(&path, encode_png(&crop)?)?;

        tracing::info!(
            track_id,
            candidate = %record.candidate,
            distance,
            path = %path.display(),
            "Learned new reference face"
        );

        Ok(Promotion {
            track_id,
            candidate: record.candidate,
            distance,
            path,
        })
    }
}

/// `learned_<track>_<local time>.png`, suffixed if that name is taken
fn unique_sample_path(dir: &Path, track_id: TrackId) -> PathBuf {
    let stem = format!(
        "learned_{}_{}",
        track_id,
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let mut path = dir.join(format!("{}.png", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.png", stem, n));
        n += 1;
    }
    path
}
