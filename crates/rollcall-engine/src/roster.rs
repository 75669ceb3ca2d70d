//! The roster: the record store together with the known-face cache derived
//! from it.

use rollcall_core::{Embedding, EmbeddingCache, KnownFace};
use rollcall_store::{DeletedCounts, RecordStore, StoreError, Student};
use std::path::Path;

/// Record store plus the in-memory cache of enrolled embeddings.
///
/// The cache is rebuilt from the store on open and after every bulk delete.
pub struct Roster {
    store: RecordStore,
    cache: EmbeddingCache,
}

impl Roster {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        Self::from_store(RecordStore::open(db_path)?)
    }

    pub fn from_store(store: RecordStore) -> Result<Self, StoreError> {
        let mut roster = Self {
            store,
            cache: EmbeddingCache::new(),
        };
        roster.reload()?;
        Ok(roster)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Rebuild the cache from every student with a decodable encoding.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        let students = self.store.list_students()?;
        self.cache = EmbeddingCache::from_faces(students.into_iter().filter_map(known_face));
        tracing::info!(known = self.cache.len(), "face cache rebuilt");
        Ok(self.cache.len())
    }

    /// Insert a newly enrolled student and append it to the cache.
    pub(crate) fn enroll(
        &mut self,
        name: &str,
        enrollment_number: &str,
        embedding: Embedding,
    ) -> Result<KnownFace, StoreError> {
        let student =
            self.store
                .create_student(name, enrollment_number, Some(&embedding.to_bytes()))?;
        let face = KnownFace {
            student_id: student.id,
            name: student.name,
            enrollment_number: student.enrollment_number,
            embedding,
        };
        self.cache.insert(face.clone());
        Ok(face)
    }

    pub fn is_enrolled(&self, enrollment_number: &str) -> Result<bool, StoreError> {
        Ok(self.store.student_by_enrollment(enrollment_number)?.is_some())
    }

    pub fn count_students(&self) -> Result<usize, StoreError> {
        self.store.count_students()
    }

    pub fn count_attendance(&self) -> Result<usize, StoreError> {
        self.store.count_attendance()
    }

    /// Delete all attendance records; students stay enrolled.
    pub fn delete_all_attendance(&mut self) -> Result<usize, StoreError> {
        let deleted = self.store.delete_all_attendance()?;
        self.reload()?;
        Ok(deleted)
    }

    /// Delete every student and attendance record.
    pub fn delete_all(&mut self) -> Result<DeletedCounts, StoreError> {
        let deleted = self.store.delete_all()?;
        self.reload()?;
        Ok(deleted)
    }
}

fn known_face(student: Student) -> Option<KnownFace> {
    let blob = student.face_encoding.as_deref()?;
    match Embedding::from_bytes(blob) {
        Ok(embedding) => Some(KnownFace {
            student_id: student.id,
            name: student.name,
            enrollment_number: student.enrollment_number,
            embedding,
        }),
        Err(e) => {
            tracing::warn!(
                enrollment = %student.enrollment_number,
                error = %e,
                "skipping student with unreadable face encoding"
            );
            None
        }
    }
}
