//! Embedding store contract and the in-memory implementations of both
//! persistence contracts.

use crate::attendance::{AppendOutcome, AttendanceEvent, AttendanceLog, EventFilter};
use crate::error::RosterError;
use crate::types::{rank_neighbors, Embedding, Identity, IdentitySummary, Neighbor};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

/// Identity -> normalized embeddings, with nearest-neighbor lookup.
pub trait EmbeddingStore: Send + Sync {
    /// Fixed embedding dimension of this store.
    fn dimension(&self) -> usize;

    /// Insert or rename an identity.
    fn upsert_identity(&self, identity: &Identity) -> Result<(), RosterError>;

    /// Normalize and append `embedding` under an existing identity.
    fn add(&self, identity_code: &str, embedding: &[f32]) -> Result<(), RosterError>;

    /// Upsert `identity` and append every embedding, all or nothing. Every
    /// embedding is validated before anything is written.
    fn enroll(&self, identity: &Identity, embeddings: &[Vec<f32>]) -> Result<usize, RosterError>;

    /// Up to `k` neighbors by ascending cosine distance; earliest enrollment
    /// wins ties. An empty store yields an empty vector.
    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RosterError>;

    /// All identities ordered by code.
    fn identities(&self) -> Result<Vec<IdentitySummary>, RosterError>;
}

fn poisoned<T>(_: PoisonError<T>) -> RosterError {
    RosterError::Persistence("lock poisoned".into())
}

#[derive(Default)]
struct Gallery {
    identities: BTreeMap<String, String>,
    entries: Vec<(String, Embedding)>,
}

/// In-process embedding store.
pub struct MemoryEmbeddingStore {
    dimension: usize,
    gallery: RwLock<Gallery>,
}

impl MemoryEmbeddingStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            gallery: RwLock::new(Gallery::default()),
        }
    }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert_identity(&self, identity: &Identity) -> Result<(), RosterError> {
        let mut gallery = self.gallery.write().map_err(poisoned)?;
        gallery
            .identities
            .insert(identity.code.clone(), identity.name.clone());
        Ok(())
    }

    fn add(&self, identity_code: &str, embedding: &[f32]) -> Result<(), RosterError> {
        let embedding = Embedding::with_dimension(embedding, self.dimension)?;
        let mut gallery = self.gallery.write().map_err(poisoned)?;
        if !gallery.identities.contains_key(identity_code) {
            return Err(RosterError::UnknownIdentity(identity_code.to_string()));
        }
        gallery.entries.push((identity_code.to_string(), embedding));
        Ok(())
    }

    fn enroll(&self, identity: &Identity, embeddings: &[Vec<f32>]) -> Result<usize, RosterError> {
        let validated = embeddings
            .iter()
            .map(|raw| Embedding::with_dimension(raw, self.dimension))
            .collect::<Result<Vec<_>, _>>()?;

        let mut gallery = self.gallery.write().map_err(poisoned)?;
        gallery
            .identities
            .insert(identity.code.clone(), identity.name.clone());
        let added = validated.len();
        gallery
            .entries
            .extend(validated.into_iter().map(|e| (identity.code.clone(), e)));
        Ok(added)
    }

    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RosterError> {
        let query = Embedding::with_dimension(query, self.dimension)?;
        let gallery = self.gallery.read().map_err(poisoned)?;
        Ok(rank_neighbors(
            &query,
            gallery.entries.iter().map(|(code, e)| (code.as_str(), e)),
            k,
        ))
    }

    fn identities(&self) -> Result<Vec<IdentitySummary>, RosterError> {
        let gallery = self.gallery.read().map_err(poisoned)?;
        Ok(gallery
            .identities
            .iter()
            .map(|(code, name)| IdentitySummary {
                code: code.clone(),
                name: name.clone(),
                embedding_count: gallery.entries.iter().filter(|(c, _)| c == code).count(),
            })
            .collect())
    }
}

/// In-process attendance log. The duplicate check and the push happen under
/// one lock.
#[derive(Default)]
pub struct MemoryAttendanceLog {
    events: Mutex<Vec<AttendanceEvent>>,
}

impl MemoryAttendanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<AttendanceEvent>>, RosterError> {
        self.events.lock().map_err(poisoned)
    }
}

impl AttendanceLog for MemoryAttendanceLog {
    fn latest_on(
        &self,
        identity_code: &str,
        day: NaiveDate,
    ) -> Result<Option<AttendanceEvent>, RosterError> {
        let events = self.lock()?;
        // max_by_key keeps the last of equal keys, i.e. the latest insertion.
        Ok(events
            .iter()
            .filter(|e| e.identity_code == identity_code && e.day() == day)
            .max_by_key(|e| e.occurred_at)
            .cloned())
    }

    fn append(&self, event: &AttendanceEvent) -> Result<AppendOutcome, RosterError> {
        let mut events = self.lock()?;
        let taken = events.iter().any(|e| {
            e.identity_code == event.identity_code
                && e.day() == event.day()
                && e.event_type == event.event_type
        });
        if taken {
            return Ok(AppendOutcome::Duplicate);
        }
        events.push(event.clone());
        Ok(AppendOutcome::Inserted)
    }

    fn events(&self, filter: &EventFilter) -> Result<Vec<AttendanceEvent>, RosterError> {
        let events = self.lock()?;
        let mut hits: Vec<AttendanceEvent> = events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        hits.truncate(filter.limit);
        Ok(hits)
    }
}
