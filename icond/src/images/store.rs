//! Generation session cache
//!
//! Recent generations are kept in memory only, keyed by an opaque UUID:
//! - Records are inserted whole after synthesis and derivation succeed
//! - Reads hand out shared, immutable records
//! - Expired records are swept opportunistically after each generation
//! - Nothing survives a restart

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{IconFormat, IconSet};
use crate::error::IconError;
use crate::synth::MemoryStats;

/// Wall-clock timings for one generation, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingBreakdown {
    pub ai_generation: f64,
    pub image_processing: f64,
    pub total: f64,
}

impl TimingBreakdown {
    pub fn new(ai_generation: f64, total: f64) -> Self {
        Self {
            ai_generation,
            image_processing: (total - ai_generation).max(0.0),
            total,
        }
    }

    /// Copy with every value rounded to two decimals
    pub fn rounded(&self) -> Self {
        Self {
            ai_generation: round2(self.ai_generation),
            image_processing: round2(self.image_processing),
            total: round2(self.total),
        }
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// One cached generation
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    /// Opaque unique identifier
    pub id: String,
    pub icons: IconSet,
    /// Format the caller asked for
    pub format: IconFormat,
    pub prompt: String,
    pub seed: u32,
    pub steps: u32,
    pub created_at: DateTime<Utc>,
    pub timing: TimingBreakdown,
    /// Device reported by the synthesis backend
    pub device: String,
    pub memory: MemoryStats,
}

impl GenerationRecord {
    /// Create a record with a fresh identifier, timestamped now
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        icons: IconSet,
        format: IconFormat,
        prompt: &str,
        seed: u32,
        steps: u32,
        timing: TimingBreakdown,
        device: &str,
        memory: MemoryStats,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            icons,
            format,
            prompt: prompt.to_string(),
            seed,
            steps,
            created_at: Utc::now(),
            timing,
            device: device.to_string(),
            memory,
        }
    }

    /// Whether the record is older than `retention` at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: TimeDelta) -> bool {
        now - self.created_at > retention
    }
}

/// In-memory generation cache
///
/// Writers (`put`, `sweep_expired`) take the write lock, so a reader never
/// sees a half-inserted or half-evicted record.
#[derive(Debug, Default)]
pub struct SessionCache {
    records: RwLock<HashMap<String, Arc<GenerationRecord>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared instance
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert a record, returning its identifier
    pub fn put(&self, record: GenerationRecord) -> String {
        let id = record.id.clone();
        self.records.write().insert(id.clone(), Arc::new(record));
        debug!("Cached generation {}", id);
        id
    }

    /// Look up a record by identifier
    pub fn get(&self, id: &str) -> Result<Arc<GenerationRecord>, IconError> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or(IconError::NotFound)
    }

    /// Remove every record older than `retention`; returns how many were removed
    pub fn sweep_expired(&self, now: DateTime<Utc>, retention: TimeDelta) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|id, record| {
            let expired = record.is_expired(now, retention);
            if expired {
                debug!("Cleaned up generation {}", id);
            }
            !expired
        });
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Hex SHA-256 of some bytes, used as a download ETag
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
