pub mod embedding;
pub mod error;
pub mod index;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod storage;
pub mod vector;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::index::FlatIndex;
use crate::model::{now_millis, MemoryRecord, SearchResult, META_PREFIX, PREF_PREFIX};
use crate::storage::RecordStore;

/// The memory engine: a durable record store coupled to an in-memory
/// vector index.
///
/// The store is the source of truth; the index and its parallel slot
/// table are derived and rebuilt from the store on open and after any
/// operation the index cannot express in place (update, remove). Writes
/// always land in the store first and touch the index only on success,
/// so a failed operation never leaves the two out of step.
///
/// One mutex serializes every public operation, reads included: update
/// and remove re-seat the whole index underneath any concurrent caller,
/// so a reader/writer split would hand out slots into a dying index.
pub struct MemoryStore {
    store: RecordStore,
    dimension: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    index: FlatIndex,
    slots: Vec<String>,
    rng: StdRng,
}

impl MemoryStore {
    /// Open the store at `path`, creating it if missing, and rebuild the
    /// vector index from whatever records survive decoding.
    pub fn open(path: &Path, dimension: usize, strict_durability: bool) -> Result<Self> {
        if dimension == 0 {
            return Err(EngineError::InvalidArgument("dimension must be positive".into()));
        }

        let store = RecordStore::open(path, strict_durability)?;
        let mut index = FlatIndex::new(dimension);
        let mut slots = Vec::new();
        Self::rebuild(&store, dimension, &mut index, &mut slots)?;

        Ok(Self {
            store,
            dimension,
            inner: Mutex::new(Inner {
                index,
                slots,
                rng: StdRng::from_entropy(),
            }),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Store("writer lock poisoned".into()))
    }

    /// Reconstruct index + slot table from the store, in key order.
    /// Records that fail to decode or carry a wrong-sized embedding are
    /// skipped with a warning; the store stays untouched.
    fn rebuild(
        store: &RecordStore,
        dimension: usize,
        index: &mut FlatIndex,
        slots: &mut Vec<String>,
    ) -> Result<()> {
        index.reset();
        slots.clear();

        for (key, value) in store.scan()? {
            if key.starts_with(PREF_PREFIX) || key.starts_with(META_PREFIX) {
                continue;
            }
            match serde_json::from_slice::<MemoryRecord>(&value) {
                Ok(record) if record.embedding.len() == dimension => {
                    index.add(&record.embedding);
                    slots.push(key);
                }
                Ok(record) => warn!(
                    id = %key,
                    expected = dimension,
                    found = record.embedding.len(),
                    "skipping record with mismatched embedding dimension"
                ),
                Err(e) => warn!(id = %key, error = %e, "skipping undecodable record"),
            }
        }
        Ok(())
    }

    fn allocate_id(rng: &mut StdRng) -> String {
        format!("mem_{}_{}", now_millis(), rng.gen_range(1000..=9999))
    }

    /// Insert a new memory. An empty `record.id` means "allocate one".
    /// Returns the id under which the record was stored.
    pub fn add(&self, record: MemoryRecord) -> Result<String> {
        if record.embedding.len() != self.dimension {
            return Err(EngineError::InvalidArgument(format!(
                "embedding dimension {} does not match store dimension {}",
                record.embedding.len(),
                self.dimension
            )));
        }

        let mut inner = self.lock()?;

        let id = if record.id.is_empty() {
            Self::allocate_id(&mut inner.rng)
        } else {
            record.id.clone()
        };

        if id.starts_with(PREF_PREFIX) || id.starts_with(META_PREFIX) {
            return Err(EngineError::InvalidArgument(format!(
                "memory id may not use the reserved prefix: {id}"
            )));
        }
        if self.store.get(&id)?.is_some() {
            return Err(EngineError::Duplicate(id));
        }

        let mut stored = record;
        stored.id = id.clone();
        let bytes =
            serde_json::to_vec(&stored).map_err(|e| EngineError::Store(e.to_string()))?;

        // Store first. If the put fails, index and slot table stay as
        // they were and the error propagates untouched.
        self.store.put(&id, &bytes)?;

        inner.index.add(&stored.embedding);
        inner.slots.push(id.clone());

        Ok(id)
    }

    /// The `min(k, size)` stored memories nearest to `query`, ascending
    /// by squared L2 distance. Entries whose record has gone missing or
    /// undecodable are skipped rather than renumbered.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimension {
            return Err(EngineError::InvalidArgument(format!(
                "query dimension {} does not match store dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let inner = self.lock()?;
        if inner.index.count() == 0 {
            return Ok(Vec::new());
        }

        let hits = inner.index.search(query, k);
        let mut results = Vec::with_capacity(hits.len());

        for (slot, dist) in hits {
            let id = &inner.slots[slot];
            match self.store.get(id) {
                Ok(Some(bytes)) => match serde_json::from_slice::<MemoryRecord>(&bytes) {
                    Ok(record) => results.push(SearchResult {
                        id: id.clone(),
                        content: record.content,
                        category: record.category,
                        score: dist,
                        timestamp: record.timestamp,
                    }),
                    Err(e) => warn!(id = %id, error = %e, "skipping undecodable search hit"),
                },
                Ok(None) => warn!(id = %id, "indexed record missing from store"),
                Err(e) => warn!(id = %id, error = %e, "store read failed during search"),
            }
        }

        Ok(results)
    }

    /// Rewrite content, embedding, and timestamp of an existing memory.
    /// Id and category are preserved. The index has no per-slot
    /// replacement, so the whole thing is rebuilt from the store.
    pub fn update(&self, id: &str, content: &str, embedding: Vec<f32>) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(EngineError::InvalidArgument(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimension
            )));
        }

        let mut inner = self.lock()?;

        let bytes = self
            .store
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let mut record: MemoryRecord = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Corrupt(format!("{id}: {e}")))?;

        record.content = content.to_string();
        record.embedding = embedding;
        record.timestamp = now_millis();

        let bytes =
            serde_json::to_vec(&record).map_err(|e| EngineError::Store(e.to_string()))?;
        self.store.put(id, &bytes)?;

        let inner = &mut *inner;
        Self::rebuild(&self.store, self.dimension, &mut inner.index, &mut inner.slots)
    }

    /// Remove a memory. A missing id is reported as `NotFound` rather
    /// than silently succeeding.
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.lock()?;

        if !self.store.delete(id)? {
            return Err(EngineError::NotFound(id.to_string()));
        }

        let inner = &mut *inner;
        Self::rebuild(&self.store, self.dimension, &mut inner.index, &mut inner.slots)
    }

    /// Whether a memory record is present in the store.
    pub fn exists(&self, id: &str) -> Result<bool> {
        let _inner = self.lock()?;
        Ok(self.store.get(id)?.is_some())
    }

    /// Number of indexed memories. Constant time.
    pub fn size(&self) -> Result<usize> {
        Ok(self.lock()?.index.count())
    }

    /// Create or overwrite a preference value.
    pub fn put_preference(&self, key: &str, value: &str) -> Result<()> {
        let _inner = self.lock()?;
        self.store
            .put(&format!("{PREF_PREFIX}{key}"), value.as_bytes())
    }

    /// Fetch a preference value. An absent key reads as the empty string.
    pub fn get_preference(&self, key: &str) -> Result<String> {
        let _inner = self.lock()?;
        let value = self.store.get(&format!("{PREF_PREFIX}{key}"))?;
        Ok(value
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default())
    }
}
