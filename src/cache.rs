//! In-memory LRU cache over record field maps.
//!
//! Keys are opaque strings (`"<table>-<id_str>"`). Entry size is an
//! approximation produced by a configurable weigher; the cache keeps the
//! running total of entry weights and evicts from the least-recently-used
//! end once the total passes `cache_size_limit`, until it is back under
//! `cache_size`.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use crate::value::{Value, Values};

/// Default target size: 100 MiB.
pub const DEFAULT_CACHE_SIZE: u64 = 100 * 1024 * 1024;

/// Entry weight estimator. The engine only requires a monotone measure;
/// the default approximates the in-memory footprint of the field map.
pub type Weigher = fn(&Values) -> u64;

struct Entry {
    values: Values,
    weight: u64,
}

struct CacheState {
    entries: HashMap<String, Entry>,
    access_list: VecDeque<String>,
    total_weight: u64,
    cache_size: u64,
    cache_size_limit: u64,
    weigher: Weigher,
}

pub struct Cache {
    state: Mutex<CacheState>,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    pub fn new() -> Cache {
        Cache::with_size(DEFAULT_CACHE_SIZE)
    }

    pub fn with_size(cache_size: u64) -> Cache {
        Cache {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                access_list: VecDeque::new(),
                total_weight: 0,
                cache_size,
                cache_size_limit: cache_size / 2 * 3,
                weigher: estimate_weight,
            }),
        }
    }

    /// Set the target size and eviction trigger. The limit never drops
    /// below the target; when omitted it defaults to 1.5x the target.
    pub fn set_cache_size(&self, cache_size: u64, cache_size_limit: Option<u64>) {
        let mut state = self.state.lock();
        state.cache_size = cache_size;
        state.cache_size_limit = match cache_size_limit {
            Some(limit) => limit.max(cache_size),
            None => cache_size / 2 * 3,
        };
    }

    pub fn get_cache_size(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.cache_size, state.cache_size_limit)
    }

    /// Swap the entry weight estimator. Existing entries keep the weight
    /// they were admitted with.
    pub fn set_weigher(&self, weigher: Weigher) {
        self.state.lock().weigher = weigher;
    }

    /// Insert or replace an entry and promote it to most-recently-used.
    /// Entries heavier than the target size are silently rejected.
    pub fn to_cache(&self, key: &str, values: &Values) {
        let mut state = self.state.lock();
        let weight = (state.weigher)(values);
        if weight > state.cache_size {
            debug!(target: "fsdb::cache", "entry \"{}\" ({} bytes) exceeds cache size, not cached", key, weight);
            return;
        }

        if let Some(old) = state.entries.remove(key) {
            state.total_weight -= old.weight;
        }
        state.entries.insert(key.to_string(), Entry { values: values.clone(), weight });
        state.total_weight += weight;
        promote(&mut state.access_list, key);

        if state.total_weight > state.cache_size_limit {
            while state.total_weight > state.cache_size {
                let Some(oldest) = state.access_list.pop_front() else { break };
                if let Some(entry) = state.entries.remove(&oldest) {
                    state.total_weight -= entry.weight;
                }
            }
        }
    }

    /// Look up an entry, promoting it to most-recently-used on a hit.
    pub fn from_cache(&self, key: &str) -> Option<Values> {
        let mut state = self.state.lock();
        if !state.entries.contains_key(key) {
            return None;
        }
        promote(&mut state.access_list, key);
        state.entries.get(key).map(|entry| entry.values.clone())
    }

    /// Drop an entry and its recency position.
    pub fn del_cache(&self, key: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(key) {
            state.total_weight -= entry.weight;
        }
        if let Some(pos) = state.access_list.iter().position(|k| k == key) {
            state.access_list.remove(pos);
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.access_list.clear();
        state.total_weight = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }
}

fn promote(access_list: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = access_list.iter().position(|k| k == key) {
        access_list.remove(pos);
    }
    access_list.push_back(key.to_string());
}

/// Default weigher: per-value footprint estimate plus key lengths.
pub fn estimate_weight(values: &Values) -> u64 {
    const ENTRY_OVERHEAD: u64 = 64;
    values.iter().map(|(k, v)| k.len() as u64 + value_weight(v)).sum::<u64>() + ENTRY_OVERHEAD
}

fn value_weight(value: &Value) -> u64 {
    const NODE: u64 = 16;
    match value {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Datetime(_) => NODE,
        Value::Str(s) => NODE + s.len() as u64,
        Value::List(items) | Value::Tuple(items) => {
            NODE + items.iter().map(value_weight).sum::<u64>()
        }
        Value::Dict(map) => {
            NODE + map.iter().map(|(k, v)| k.len() as u64 + value_weight(v)).sum::<u64>()
        }
        Value::File(f) => {
            NODE + f.name.len() as u64 + f.data.as_ref().map(|d| d.len() as u64).unwrap_or(0)
        }
        Value::FileList(files) => {
            NODE + files
                .iter()
                .map(|f| f.name.len() as u64 + f.data.as_ref().map(|d| d.len() as u64).unwrap_or(0))
                .sum::<u64>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: &str) -> Values {
        let mut values = Values::new();
        values.insert("val".into(), Value::Str(tag.into()));
        values
    }

    fn unit_weigher(_: &Values) -> u64 {
        1
    }

    #[test]
    fn hit_miss_and_delete() {
        let cache = Cache::new();
        assert!(cache.from_cache("t-1").is_none());
        cache.to_cache("t-1", &entry("a"));
        assert_eq!(cache.from_cache("t-1").unwrap(), entry("a"));
        cache.del_cache("t-1");
        assert!(cache.from_cache("t-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oversized_entries_are_rejected_silently() {
        let cache = Cache::with_size(4);
        cache.to_cache("t-1", &entry("way too big for four bytes"));
        assert!(cache.from_cache("t-1").is_none());
    }

    #[test]
    fn evicts_least_recently_used() {
        // cache of N unit entries with limit == target: the N+1th put must
        // push out the least recently promoted key
        let cache = Cache::new();
        cache.set_cache_size(3, Some(3));
        cache.set_weigher(unit_weigher);

        cache.to_cache("t-1", &entry("a"));
        cache.to_cache("t-2", &entry("b"));
        cache.to_cache("t-3", &entry("c"));
        // promote t-1 so t-2 is now the oldest
        assert!(cache.from_cache("t-1").is_some());
        cache.to_cache("t-4", &entry("d"));
        crate::tprintln!("[cache test] {} entries after eviction", cache.len());

        assert!(!cache.contains("t-2"));
        assert!(cache.contains("t-1"));
        assert!(cache.contains("t-3"));
        assert!(cache.contains("t-4"));
    }

    #[test]
    fn eviction_drains_down_to_target() {
        let cache = Cache::new();
        cache.set_cache_size(2, Some(4));
        cache.set_weigher(unit_weigher);

        for key in ["a", "b", "c", "d"] {
            cache.to_cache(key, &entry(key));
        }
        assert_eq!(cache.len(), 4);
        // fifth put passes the limit and drains back to the target
        cache.to_cache("e", &entry("e"));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("e"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn replace_updates_weight_instead_of_double_counting() {
        let cache = Cache::new();
        cache.set_cache_size(1000, Some(1000));
        for _ in 0..50 {
            cache.to_cache("t-1", &entry("same key every time"));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.from_cache("t-1").is_some());
    }

    #[test]
    fn clear_empties_everything() {
        let cache = Cache::new();
        cache.to_cache("t-1", &entry("a"));
        cache.to_cache("t-2", &entry("b"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.from_cache("t-1").is_none());
    }
}
