//! In-memory cache of enrolled faces.
//!
//! The cache is a derived view of the record store: it can always be rebuilt
//! from the stored students and is never written back.

use crate::types::Embedding;
use std::collections::HashMap;

/// Default cosine-distance threshold for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.2;

/// One enrolled student as seen by the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFace {
    pub student_id: i64,
    pub name: String,
    pub enrollment_number: String,
    pub embedding: Embedding,
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub student_id: i64,
    pub name: String,
    pub enrollment_number: String,
    /// Cosine distance to the stored embedding, `1 - similarity`.
    pub distance: f32,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
}

impl FaceMatch {
    /// Similarity as a whole percentage, clamped at zero.
    pub fn confidence_percent(&self) -> u32 {
        (self.similarity.max(0.0) * 100.0) as u32
    }
}

/// Known embeddings keyed by enrollment number, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCache {
    entries: Vec<KnownFace>,
    by_enrollment: HashMap<String, usize>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from faces in enrollment order. A later entry with the
    /// same enrollment number replaces the earlier one in place.
    pub fn from_faces(faces: impl IntoIterator<Item = KnownFace>) -> Self {
        let mut cache = Self::new();
        for face in faces {
            cache.insert(face);
        }
        cache
    }

    /// Append a face, or replace the entry with the same enrollment number.
    pub fn insert(&mut self, face: KnownFace) {
        match self.by_enrollment.get(&face.enrollment_number) {
            Some(&idx) => self.entries[idx] = face,
            None => {
                self.by_enrollment
                    .insert(face.enrollment_number.clone(), self.entries.len());
                self.entries.push(face);
            }
        }
    }

    pub fn get(&self, enrollment_number: &str) -> Option<&KnownFace> {
        self.by_enrollment
            .get(enrollment_number)
            .map(|&idx| &self.entries[idx])
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_enrollment.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownFace> {
        self.entries.iter()
    }

    /// Find the closest known face by cosine distance.
    ///
    /// Scans every entry. Returns the minimum-distance entry when its
    /// distance is strictly below `threshold`. On equal distances the
    /// earliest-enrolled entry wins. Entries whose dimension differs from
    /// the probe are skipped.
    pub fn best_match(&self, probe: &Embedding, threshold: f32) -> Option<FaceMatch> {
        let mut best: Option<(usize, f32)> = None;

        for (idx, face) in self.entries.iter().enumerate() {
            if face.embedding.dim() != probe.dim() {
                tracing::debug!(
                    enrollment = %face.enrollment_number,
                    stored = face.embedding.dim(),
                    probe = probe.dim(),
                    "skipping known face with mismatched dimension"
                );
                continue;
            }
            let distance = probe.distance(&face.embedding);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }

        let (idx, distance) = best?;
        if distance >= threshold {
            return None;
        }

        let face = &self.entries[idx];
        Some(FaceMatch {
            student_id: face.student_id,
            name: face.name.clone(),
            enrollment_number: face.enrollment_number.clone(),
            distance,
            similarity: 1.0 - distance,
        })
    }
}
