use serde::{Deserialize, Serialize};

// Default embedding dimensionality (matches common sentence encoders)
pub const DEFAULT_DIM: usize = 1024;

/// Key prefix for user preference entries.
pub const PREF_PREFIX: &str = "pref:";
/// Key prefix reserved for store metadata. Load skips it.
pub const META_PREFIX: &str = "meta:";

/// The Atomic Unit of Recall
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    /// Unique ID of the memory. Empty on input means "allocate one".
    pub id: String,

    /// The user-authored text
    pub content: String,

    /// Flat grouping label ("general" when the caller gives none)
    pub category: String,

    /// Milliseconds since epoch at write time
    pub timestamp: i64,

    /// The high-dimensional embedding (the "meaning")
    pub embedding: Vec<f32>,
}

impl MemoryRecord {
    pub fn new(
        id: String,
        content: String,
        category: String,
        timestamp: i64,
        embedding: Vec<f32>,
    ) -> Self {
        Self { id, content, category, timestamp, embedding }
    }
}

/// One search hit. Results are ordered by ascending squared L2 distance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub category: String,
    /// Squared L2 distance to the query. Smaller is more similar.
    pub score: f32,
    pub timestamp: i64,
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
