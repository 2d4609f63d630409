//! # Result Cache
//!
//! In-memory cache of successful task outputs, bounded by a time-to-live and
//! a byte budget.
//!
//! - Entries expire lazily: a read at or after `expires_at` removes the
//!   entry and reports a miss.
//! - Inserting past the budget evicts the entries with the lowest
//!   hits-per-idle-second score until the new value fits.
//! - A value larger than the whole budget is never stored.

use crate::clock::Clock;
use crate::events::{EngineEvent, EventBus, EvictionReason};
use crate::telemetry::EngineTelemetry;
use chrono::{DateTime, Duration, Utc};
use config::CacheConfig;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use task_core::{TaskOutput, TaskPayload, TaskRequest, TaskType};
use tracing::{debug, info};

const DEFAULT_TTL_SECS: i64 = 86_400;

/// Fixed per-entry overhead added to the serialized value size.
const ENTRY_OVERHEAD_BYTES: usize = 128;

/// Identity of a cached result: task type, language pair, and a digest of
/// the payload together with its disambiguating context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub task_type: TaskType,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub fingerprint: String
}

impl CacheKey {
    pub fn for_request(request: &TaskRequest) -> Self {
        Self {
            task_type: request.task_type(),
            source_language: normalize_language(request.source_language.as_deref()),
            target_language: normalize_language(request.target_language.as_deref()),
            fingerprint: Self::fingerprint(&request.payload, request.context.as_deref())
        }
    }

    /// Hex SHA-256 over the payload text, its task parameters and the
    /// context. "bank" near "river" and "bank" near "money" get different
    /// fingerprints.
    pub fn fingerprint(payload: &TaskPayload, context: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.task_type().to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(payload.text().trim().as_bytes());
        hasher.update(b"\x1f");
        match payload {
            TaskPayload::Summarize { max_sentences, .. } => {
                hasher.update(max_sentences.to_le_bytes());
            }
            TaskPayload::Rewrite { tone, .. } => hasher.update(tone.to_string().as_bytes()),
            TaskPayload::AnalyzeVocabulary { max_words, .. } => {
                hasher.update(max_words.to_le_bytes());
            }
            TaskPayload::Translate { .. } | TaskPayload::DetectLanguage { .. } => {}
        }
        hasher.update(b"\x1f");
        if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
            hasher.update(context.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.task_type,
            self.source_language.as_deref().unwrap_or("*"),
            self.target_language.as_deref().unwrap_or("*"),
            self.fingerprint.get(..16).unwrap_or(&self.fingerprint)
        )
    }
}

fn normalize_language(language: Option<&str>) -> Option<String> {
    language
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
}

/// Default size estimator: serialized JSON length plus a fixed overhead.
pub fn estimate_size(value: &TaskOutput) -> usize {
    serde_json::to_vec(value).map_or(ENTRY_OVERHEAD_BYTES, |bytes| bytes.len()) + ENTRY_OVERHEAD_BYTES
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: TaskOutput,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    hit_count: u64,
    size_bytes: usize,
    expires_at: DateTime<Utc>
}

/// Metadata of one live entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryInfo {
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Uses of the entry, counting the insert itself.
    pub hit_count: u64,
    pub size_bytes: usize,
    pub expires_at: DateTime<Utc>
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Entry with the fewest hits per second since its last access; ties go
    /// to the older access, then to the lower hit count.
    fn eviction_candidate(&self, now: DateTime<Utc>) -> Option<CacheKey> {
        self.entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                score(a, now)
                    .total_cmp(&score(b, now))
                    .then(a.last_accessed_at.cmp(&b.last_accessed_at))
                    .then(a.hit_count.cmp(&b.hit_count))
            })
            .map(|(key, _)| key.clone())
    }
}

fn score(entry: &CacheEntry, now: DateTime<Utc>) -> f64 {
    let idle_ms = (now - entry.last_accessed_at).num_milliseconds().max(1);
    entry.hit_count as f64 / (idle_ms as f64 / 1000.0)
}

pub struct ResultCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_bytes: usize,
    clock: Arc<dyn Clock>,
    events: EventBus,
    telemetry: Arc<EngineTelemetry>
}

impl ResultCache {
    pub fn new(
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
        telemetry: Arc<EngineTelemetry>
    ) -> Self {
        let ttl = i64::try_from(config.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_TTL_SECS));

        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
            max_bytes: config.max_bytes,
            clock,
            events,
            telemetry
        }
    }

    /// Returns the cached output when a live entry exists, bumping its hit
    /// count and access time.
    pub fn get(&self, key: &CacheKey) -> Option<TaskOutput> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.hit_count += 1;
                entry.last_accessed_at = now;
                let value = entry.value.clone();
                state.hits += 1;
                return Some(value);
            }
            Some(_) => {}
            None => {
                state.misses += 1;
                return None;
            }
        }

        if let Some(entry) = state.remove(key) {
            state.expirations += 1;
            self.report_eviction(key, &entry, EvictionReason::Expired);
        }
        state.misses += 1;
        None
    }

    /// Stores `value` with the default size estimate. Returns whether the
    /// value was stored.
    pub fn set(&self, key: CacheKey, value: TaskOutput) -> bool {
        let size_bytes = estimate_size(&value);
        self.set_with_size(key, value, size_bytes)
    }

    pub fn set_with_size(&self, key: CacheKey, value: TaskOutput, size_bytes: usize) -> bool {
        if size_bytes > self.max_bytes {
            debug!(
                key = %key,
                size_bytes,
                max_bytes = self.max_bytes,
                "Value exceeds cache budget, not caching"
            );
            return false;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.remove(&key);
        self.evict_if_over_budget(&mut state, size_bytes, now);

        state.total_bytes += size_bytes;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed_at: now,
                hit_count: 1,
                size_bytes,
                expires_at: now + self.ttl
            }
        );
        self.telemetry
            .record_cache_size(state.entries.len(), state.total_bytes);
        true
    }

    /// Makes room for `incoming` bytes: expired entries go first, then the
    /// lowest-scoring live ones.
    fn evict_if_over_budget(&self, state: &mut CacheState, incoming: usize, now: DateTime<Utc>) {
        if state.total_bytes + incoming <= self.max_bytes {
            return;
        }

        self.purge_expired_locked(state, now);

        while state.total_bytes + incoming > self.max_bytes {
            let Some(victim) = state.eviction_candidate(now) else {
                break;
            };
            if let Some(entry) = state.remove(&victim) {
                state.evictions += 1;
                self.report_eviction(&victim, &entry, EvictionReason::Budget);
            }
        }
    }

    /// Drops every entry whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let removed = self.purge_expired_locked(&mut state, now);
        if removed > 0 {
            info!(removed, "Purged expired cache entries");
            self.telemetry
                .record_cache_size(state.entries.len(), state.total_bytes);
        }
        removed
    }

    fn purge_expired_locked(&self, state: &mut CacheState, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = state.remove(key) {
                state.expirations += 1;
                self.report_eviction(key, &entry, EvictionReason::Expired);
            }
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let entries = state.entries.len();
        state.entries.clear();
        state.total_bytes = 0;
        info!(entries, "Cleared result cache");
        self.telemetry.record_cache_size(0, 0);
    }

    pub fn entry_info(&self, key: &CacheKey) -> Option<CacheEntryInfo> {
        self.state.lock().entries.get(key).map(|entry| CacheEntryInfo {
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            hit_count: entry.hit_count,
            size_bytes: entry.size_bytes,
            expires_at: entry.expires_at
        })
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            max_bytes: self.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations
        }
    }

    fn report_eviction(&self, key: &CacheKey, entry: &CacheEntry, reason: EvictionReason) {
        debug!(key = %key, size_bytes = entry.size_bytes, %reason, "Cache entry evicted");
        self.telemetry.record_cache_eviction(reason, entry.size_bytes);
        self.events.publish(EngineEvent::CacheEvicted {
            key: key.to_string(),
            size_bytes: entry.size_bytes,
            reason
        });
    }
}
