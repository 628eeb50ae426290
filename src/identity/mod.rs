//! IdentityResolver - Track-to-Identity Resolution
//!
//! ## Responsibilities
//!
//! - Cache `{name, embedding}` per track so confirmed tracks skip extraction
//! - Re-attempt resolution every frame while a track is still Unknown
//! - Classify nearest-neighbour distances into confirmed / learning / unknown
//! - Forward learning-range sightings to the SelfLearningCache and reload the
//!   gallery when it promotes
//! - Fire an alarm with the full-resolution crop on confirmation
//!
//! ## Thresholds
//!
//! Distances are squared L2 between unit embeddings (range 0..4):
//! `< match_threshold` confirmed, `< learning_threshold` learning, else unknown.

pub mod gallery;
pub mod self_learning;

pub use gallery::{FlatL2Index, KnownIdentityGallery, Lookup, NearestIdentityIndex, Neighbor};
pub use self_learning::{LearningOutcome, Promotion, SelfLearningCache, SelfLearningConfig};

use crate::alarm_dispatcher::AlarmDispatcher;
use crate::error::Result;
use crate::inference_client::FaceAnalyzer;
use crate::models::{Frame, TrackId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const UNKNOWN: &str = "Unknown";

/// Prefix of the in-progress label
pub const LEARNING_PREFIX: &str = "Learning";

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub match_threshold: f32,
    pub learning_threshold: f32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            match_threshold: 1.1,
            learning_threshold: 2.0,
        }
    }
}

/// Display name of a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed(String),
    /// Unknown, but a learning record for `candidate` is building up
    Learning { candidate: String },
    Unknown,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Confirmed(name) => f.write_str(name),
            Resolution::Learning { candidate } => write!(f, "{}-{}", LEARNING_PREFIX, candidate),
            Resolution::Unknown => f.write_str(UNKNOWN),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` while unknown
    name: Option<String>,
    embedding: Vec<f32>,
}

/// Owns the identity cache, gallery and learning cache for one pipeline
pub struct IdentityResolver {
    config: IdentityConfig,
    analyzer: Arc<dyn FaceAnalyzer>,
    gallery: KnownIdentityGallery,
    learning: SelfLearningCache,
    alarms: Option<Arc<AlarmDispatcher>>,
    cache: HashMap<TrackId, CacheEntry>,
    reload_pending: bool,
}

impl IdentityResolver {
    /// Create new IdentityResolver
    pub fn new(
        config: IdentityConfig,
        analyzer: Arc<dyn FaceAnalyzer>,
        gallery: KnownIdentityGallery,
        learning: SelfLearningCache,
        alarms: Option<Arc<AlarmDispatcher>>,
    ) -> Self {
        Self {
            config,
            analyzer,
            gallery,
            learning,
            alarms,
            cache: HashMap::new(),
            reload_pending: false,
        }
    }

    pub fn gallery(&self) -> &KnownIdentityGallery {
        &self.gallery
    }

    pub fn learning(&self) -> &SelfLearningCache {
        &self.learning
    }

    /// True after an index/name mismatch until the next successful rebuild
    pub fn reload_pending(&self) -> bool {
        self.reload_pending
    }

    /// Drop everything held for a track that no tracker will report again
    pub fn forget(&mut self, track_id: TrackId) {
        self.cache.remove(&track_id);
        self.learning.forget(track_id);
    }

    /// Last embedding extracted for a track
    pub fn cached_embedding(&self, track_id: TrackId) -> Option<&[f32]> {
        self.cache.get(&track_id).map(|e| e.embedding.as_slice())
    }

    /// Resolve the display name for `track_id`
    ///
    /// `small_crop` feeds the embedding model, `crop` (full resolution) is what
    /// alarms and learned samples use.
    pub fn resolve(&mut self, track_id: TrackId, small_crop: &Frame, crop: &Frame) -> Result<Resolution> {
        let needs_lookup = self
            .cache
            .get(&track_id)
            .map_or(true, |entry| entry.name.is_none());
        if needs_lookup {
            self.compare(track_id, small_crop, crop)?;
        }

        Ok(match self.cache.get(&track_id) {
            Some(CacheEntry { name: Some(name), .. }) => Resolution::Confirmed(name.clone()),
            Some(_) => match self.learning.candidate(track_id) {
                Some(candidate) => Resolution::Learning {
                    candidate: candidate.to_string(),
                },
                None => Resolution::Unknown,
            },
            None => Resolution::Unknown,
        })
    }

    fn compare(&mut self, track_id: TrackId, small_crop: &Frame, crop: &Frame) -> Result<()> {
        let faces = self.analyzer.detect_faces(small_crop)?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(());
        };

        let mut name = None;
        match self.gallery.nearest(&face.embedding) {
            None => {}
            Some(Lookup::OutOfRange { index, known }) => {
                tracing::warn!(
                    track_id,
                    index,
                    known,
                    "Identity index out of range for gallery, reload scheduled"
                );
                self.reload_pending = true;
            }
            Some(Lookup::Match { name: matched, distance }) => {
                tracing::debug!(track_id, best_match = %matched, distance, "Nearest identity");
                if distance < self.config.match_threshold {
                    tracing::info!(track_id, name = %matched, distance, "Identity confirmed");
                    if let Some(alarms) = &self.alarms {
                        alarms.fire(crop, matched.clone());
                    }
                    name = Some(matched);
                } else if distance < self.config.learning_threshold {
                    self.learn(track_id, &matched, distance, crop);
                }
            }
        }

        self.cache.insert(
            track_id,
            CacheEntry {
                name,
                embedding: face.embedding,
            },
        );
        Ok(())
    }

    fn learn(&mut self, track_id: TrackId, candidate: &str, distance: f32, crop: &Frame) {
        if self.reload_pending {
            self.reload_gallery();
        }
        match self.learning.observe(track_id, candidate, distance, crop) {
            Ok(LearningOutcome::Promoted(promotion)) => {
                tracing::info!(
                    track_id,
                    candidate = %promotion.candidate,
                    "Reloading gallery after promotion"
                );
                self.reload_gallery();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(track_id, candidate, error = %e, "Learned sample could not be stored");
            }
        }
    }

    /// Rebuild gallery and index; the old ones stay in use on failure
    pub fn reload_gallery(&mut self) {
        match self.gallery.rebuild(self.analyzer.as_ref()) {
            Ok(()) => {
                self.reload_pending = false;
                tracing::info!(faces = self.gallery.len(), "Gallery reloaded");
            }
            Err(e) => {
                tracing::error!(error = %e, "Gallery reload failed, keeping previous index");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference_client::FaceDetection;
    use crate::models::BBox;
    use image::Rgb;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the queued embeddings in order, then no faces
    struct ScriptedAnalyzer {
        script: Mutex<Vec<Vec<f32>>>,
        calls: AtomicUsize,
    }

    impl ScriptedAnalyzer {
        fn new(script: Vec<Vec<f32>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn detect_faces(&self, _frame: &Frame) -> Result<Vec<FaceDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .script
                .lock()
                .pop()
                .map(|embedding| {
                    vec![FaceDetection {
                        bbox: BBox::new(0, 0, 4, 4),
                        score: 0.9,
                        embedding,
                    }]
                })
                .unwrap_or_default())
        }
    }

    fn gallery(root: &Path) -> KnownIdentityGallery {
        let mut index = FlatL2Index::new();
        index.add(vec![0.0, 0.0]);
        KnownIdentityGallery::from_parts(root, vec!["Alice".to_string()], Box::new(index))
    }

    fn resolver(root: &Path, analyzer: Arc<ScriptedAnalyzer>) -> IdentityResolver {
        IdentityResolver::new(
            IdentityConfig::default(),
            analyzer,
            gallery(root),
            SelfLearningCache::new(root, SelfLearningConfig::default()).unwrap(),
            None,
        )
    }

    fn crop() -> Frame {
        Frame::from_pixel(4, 4, Rgb([9, 9, 9]))
    }

    #[test]
    fn test_confirmed_name_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        // squared distance 0.25
        let analyzer = ScriptedAnalyzer::new(vec![vec![0.5, 0.0]]);
        let mut r = resolver(dir.path(), analyzer.clone());

        assert_eq!(r.resolve(1, &crop(), &crop()).unwrap(), Resolution::Confirmed("Alice".into()));
        for _ in 0..5 {
            assert_eq!(r.resolve(1, &crop(), &crop()).unwrap(), Resolution::Confirmed("Alice".into()));
        }
        assert_eq!(analyzer.calls(), 1);
    }

    #[test]
    fn test_unknown_retried_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        // squared distance 9.0, then 0.01
        let analyzer = ScriptedAnalyzer::new(vec![vec![3.0, 0.0], vec![0.1, 0.0]]);
        let mut r = resolver(dir.path(), analyzer.clone());

        assert_eq!(r.resolve(2, &crop(), &crop()).unwrap(), Resolution::Unknown);
        assert_eq!(r.cached_embedding(2), Some(&[3.0, 0.0][..]));
        assert_eq!(r.resolve(2, &crop(), &crop()).unwrap(), Resolution::Confirmed("Alice".into()));
        assert_eq!(analyzer.calls(), 2);
    }

    #[test]
    fn test_no_face_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = ScriptedAnalyzer::new(Vec::new());
        let mut r = resolver(dir.path(), analyzer.clone());

        assert_eq!(r.resolve(3, &crop(), &crop()).unwrap(), Resolution::Unknown);
        assert_eq!(r.resolve(3, &crop(), &crop()).unwrap(), Resolution::Unknown);
        assert_eq!(analyzer.calls(), 2);
    }

    #[test]
    fn test_learning_label() {
        let dir = tempfile::tempdir().unwrap();
        // squared distance 1.44: inside the learning band
        let analyzer = ScriptedAnalyzer::new(vec![vec![1.2, 0.0]]);
        let mut r = resolver(dir.path(), analyzer);

        let res = r.resolve(4, &crop(), &crop()).unwrap();
        assert_eq!(
            res,
            Resolution::Learning {
                candidate: "Alice".into()
            }
        );
        assert_eq!(res.to_string(), "Learning-Alice");
        assert!(r.learning().is_learning(4));
    }

    #[test]
    fn test_promotion_reloads_gallery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Alice")).unwrap();
        let analyzer = ScriptedAnalyzer::new(vec![vec![1.2, 0.0]; 5]);
        let mut r = resolver(dir.path(), analyzer);

        for _ in 0..4 {
            assert!(matches!(
                r.resolve(5, &crop(), &crop()).unwrap(),
                Resolution::Learning { .. }
            ));
        }
        // fifth sample promotes; the rebuilt gallery sees the stored image, but the
        // scripted analyzer has run dry so it contributes no embedding
        assert_eq!(r.resolve(5, &crop(), &crop()).unwrap(), Resolution::Unknown);
        assert!(!r.learning().is_learning(5));
        assert_eq!(std::fs::read_dir(dir.path().join("Alice")).unwrap().count(), 1);
        assert!(r.gallery().is_empty());
    }

    #[test]
    fn test_out_of_range_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FlatL2Index::new();
        index.add(vec![9.0, 9.0]);
        index.add(vec![0.0, 0.0]);
        let gallery = KnownIdentityGallery::from_parts(dir.path(), vec!["Alice".into()], Box::new(index));
        let analyzer = ScriptedAnalyzer::new(vec![vec![0.0, 0.0]]);
        let mut r = IdentityResolver::new(
            IdentityConfig::default(),
            analyzer,
            gallery,
            SelfLearningCache::new(dir.path(), SelfLearningConfig::default()).unwrap(),
            None,
        );

        assert_eq!(r.resolve(6, &crop(), &crop()).unwrap(), Resolution::Unknown);
        assert!(r.reload_pending());
    }

    #[test]
    fn test_pending_reload_runs_on_next_learning_sighting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Alice")).unwrap();
        Frame::from_pixel(4, 4, Rgb([200, 0, 0]))
            .save(dir.path().join("Alice/1.png"))
            .unwrap();

        // two vectors but one name: index 1 has no name
        let mut index = FlatL2Index::new();
        index.add(vec![0.0, 0.0]);
        index.add(vec![9.0, 9.0]);
        let gallery = KnownIdentityGallery::from_parts(dir.path(), vec!["Alice".into()], Box::new(index));
        // sighting on index 1, learning-band sighting of Alice, then the rebuild's one image
        let analyzer = ScriptedAnalyzer::new(vec![vec![9.0, 9.0], vec![1.2, 0.0], vec![0.0, 0.0]]);
        let mut r = IdentityResolver::new(
            IdentityConfig::default(),
            analyzer.clone(),
            gallery,
            SelfLearningCache::new(dir.path(), SelfLearningConfig::default()).unwrap(),
            None,
        );

        assert_eq!(r.resolve(1, &crop(), &crop()).unwrap(), Resolution::Unknown);
        assert!(r.reload_pending());
        assert_eq!(r.gallery().len(), 2);

        assert_eq!(
            r.resolve(2, &crop(), &crop()).unwrap(),
            Resolution::Learning {
                candidate: "Alice".into()
            }
        );
        assert!(!r.reload_pending());
        assert_eq!(analyzer.calls(), 3);
        assert_eq!(r.gallery().len(), 1);
        assert_eq!(r.gallery().names(), ["Alice".to_string()]);
        assert!(r.learning().is_learning(2));
    }

    #[test]
    fn test_forget_drops_cache_and_learning() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = ScriptedAnalyzer::new(vec![vec![1.2, 0.0]]);
        let mut r = resolver(dir.path(), analyzer);

        r.resolve(9, &crop(), &crop()).unwrap();
        assert!(r.cached_embedding(9).is_some());
        assert!(r.learning().is_learning(9));

        r.forget(9);
        assert!(r.cached_embedding(9).is_none());
        assert!(!r.learning().is_learning(9));
    }

    #[test]
    fn test_confirmation_fires_alarm() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, mut rx) = AlarmDispatcher::new(4);
        let analyzer = ScriptedAnalyzer::new(vec![vec![0.0, 0.0]]);
        let mut r = IdentityResolver::new(
            IdentityConfig::default(),
            analyzer,
            gallery(dir.path()),
            SelfLearningCache::new(dir.path(), SelfLearningConfig::default()).unwrap(),
            Some(Arc::new(dispatcher)),
        );

        r.resolve(8, &crop(), &crop()).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.message, "Alice");
        assert_eq!(event.frame.dimensions(), (4, 4));
    }
}
