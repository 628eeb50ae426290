//! Known-identity gallery and its nearest-neighbour index
//!
//! Layout on disk: `<root>/<name>/<image files>`. Every image that contains
//! exactly one face contributes one reference embedding under `name`.

use crate::error::{Error, Result};
use crate::inference_client::FaceAnalyzer;
use std::path::{Path, PathBuf};

/// Closest stored vector for a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    /// Squared L2 distance
    pub distance: f32,
}

/// Nearest-neighbour lookup over reference embeddings
pub trait NearestIdentityIndex: Send {
    /// Single closest vector, `None` when the index is empty
    fn search(&self, query: &[f32]) -> Option<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive squared-L2 search
#[derive(Debug, Default, Clone)]
pub struct FlatL2Index {
    vectors: Vec<Vec<f32>>,
}

impl FlatL2Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vector: Vec<f32>) {
        self.vectors.push(vector);
    }
}

impl NearestIdentityIndex for FlatL2Index {
    fn search(&self, query: &[f32]) -> Option<Neighbor> {
        self.vectors
            .iter()
            .enumerate()
            .map(|(index, v)| Neighbor {
                index,
                distance: squared_l2(v, query),
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Result of a gallery lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Match { name: String, distance: f32 },
    /// Index returned a position the name list does not have
    OutOfRange { index: usize, known: usize },
}

/// `names[i]` labels index vector `i`
pub struct KnownIdentityGallery {
    root: PathBuf,
    names: Vec<String>,
    index: Box<dyn NearestIdentityIndex>,
}

impl KnownIdentityGallery {
    /// Build the gallery from `root`. A missing root is a configuration error.
    pub fn load(root: impl Into<PathBuf>, analyzer: &dyn FaceAnalyzer) -> Result<Self> {
        let root = root.into();
        let (names, index) = scan(&root, analyzer)?;
        Ok(Self {
            root,
            names,
            index: Box::new(index),
        })
    }

    /// Assemble from pre-built parts
    pub fn from_parts(
        root: impl Into<PathBuf>,
        names: Vec<String>,
        index: Box<dyn NearestIdentityIndex>,
    ) -> Self {
        Self {
            root: root.into(),
            names,
            index,
        }
    }

    /// Rescan the directory and swap in the new names and index.
    /// On failure the current contents stay in use.
    pub fn rebuild(&mut self, analyzer: &dyn FaceAnalyzer) -> Result<()> {
        let (names, index) = scan(&self.root, analyzer)?;
        self.names = names;
        self.index = Box::new(index);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Closest known identity, `None` for an empty gallery
    pub fn nearest(&self, embedding: &[f32]) -> Option<Lookup> {
        let neighbor = self.index.search(embedding)?;
        Some(match self.names.get(neighbor.index) {
            Some(name) => Lookup::Match {
                name: name.clone(),
                distance: neighbor.distance,
            },
            None => Lookup::OutOfRange {
                index: neighbor.index,
                known: self.names.len(),
            },
        })
    }
}

fn scan(root: &Path, analyzer: &dyn FaceAnalyzer) -> Result<(Vec<String>, FlatL2Index)> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "known faces directory not found: {}",
            root.display()
        )));
    }
    tracing::info!(root = %root.display(), "Loading known faces");

    let mut person_dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    person_dirs.sort();

    let mut names = Vec::new();
    let mut index = FlatL2Index::new();

    for dir in person_dirs {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        for path in files {
            let img = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable gallery image");
                    continue;
                }
            };
            let faces = match analyzer.detect_faces(&img) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Face analysis failed");
                    continue;
                }
            };
            if faces.len() != 1 {
                tracing::warn!(
                    path = %path.display(),
                    faces = faces.len(),
                    "Expected exactly one face, skipping"
                );
                continue;
            }
            let Some(face) = faces.into_iter().next() else {
                continue;
            };
            index.add(face.embedding);
            names.push(name.clone());
            tracing::debug!(path = %path.display(), name = %name, "Reference face loaded");
        }
    }

    tracing::info!(faces = names.len(), "Known faces index built");
    Ok((names, index))
}
