use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::fs;
use std::hash::Hash;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::CarbotaxError;
use crate::fs_util::write_atomic;

pub const DEFAULT_MAX_ENTRIES: usize = 200;
pub const DEFAULT_SAVE_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.map.get(key)
    }

    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return None;
        }
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), value);
            self.touch(&key);
            return None;
        }

        let mut evicted = None;
        if self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                evicted = self.map.remove(&oldest).map(|value| (oldest, value));
            }
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        evicted
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|key| self.map.get(key).map(|value| (key, value)))
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

/// Saved every `save_batch_size` new keys, on `save`, and on drop.
#[derive(Debug)]
pub struct PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Display + FromStr,
    V: Serialize + DeserializeOwned,
{
    path: Option<Utf8PathBuf>,
    memory: LruCache<K, V>,
    save_batch_size: usize,
    pending: usize,
    dirty: bool,
}

impl<K, V> PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Display + FromStr,
    V: Serialize + DeserializeOwned,
{
    pub fn open(path: impl Into<Utf8PathBuf>, max_entries: usize, save_batch_size: usize) -> Self {
        let mut cache = Self {
            path: Some(path.into()),
            memory: LruCache::new(max_entries),
            save_batch_size: save_batch_size.max(1),
            pending: 0,
            dirty: false,
        };
        if let Err(err) = cache.load() {
            error!(path = ?cache.path, %err, "failed to load cache file; starting empty");
            cache.memory.clear();
        }
        cache
    }

    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            path: None,
            memory: LruCache::new(max_entries),
            save_batch_size: DEFAULT_SAVE_BATCH_SIZE,
            pending: 0,
            dirty: false,
        }
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.memory.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.memory.contains(key)
    }

    pub fn set(&mut self, key: K, value: V) {
        let was_new = !self.memory.contains(&key);
        self.memory.set(key, value);
        if !was_new {
            return;
        }
        self.dirty = true;
        self.pending += 1;
        if self.pending >= self.save_batch_size {
            if let Err(err) = self.save() {
                error!(path = ?self.path, %err, "failed to save cache");
            }
            self.pending = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.memory.iter()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> Result<(), CarbotaxError> {
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        // Least to most recently used, so `load` replays recency in file order.
        let mut object = Map::new();
        for (key, value) in self.memory.iter() {
            let value = serde_json::to_value(value)
                .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
            object.insert(key.to_string(), value);
        }
        let content = serde_json::to_vec_pretty(&Value::Object(object))
            .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
        write_atomic(&path, &content)?;

        self.dirty = false;
        debug!(path = %path, entries = self.memory.len(), "saved cache");
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), CarbotaxError> {
        self.memory.clear();
        self.dirty = false;
        self.pending = 0;
        if let Some(path) = &self.path {
            if path.as_std_path().exists() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), CarbotaxError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !path.as_std_path().exists() {
            debug!(path = %path, "cache file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
        let data: Map<String, Value> = serde_json::from_str(&content)
            .map_err(|err| CarbotaxError::Parse(format!("{path}: {err}")))?;

        let total = data.len();
        let mut loaded = 0usize;
        for (raw_key, raw_value) in data {
            if is_falsy(&raw_value) {
                continue;
            }
            let Ok(key) = raw_key.parse::<K>() else {
                warn!(path = %path, key = %raw_key, "skipping cache entry with unparseable key");
                continue;
            };
            match serde_json::from_value::<V>(raw_value) {
                Ok(value) => {
                    self.memory.set(key, value);
                    loaded += 1;
                }
                Err(err) => {
                    warn!(path = %path, key = %raw_key, %err, "skipping malformed cache entry");
                }
            }
        }
        info!(path = %path, loaded, total, "loaded cache");
        Ok(())
    }
}

impl<K, V> Drop for PersistentCache<K, V>
where
    K: Eq + Hash + Clone + Display + FromStr,
    V: Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if let Err(err) = self.save() {
            error!(path = ?self.path, %err, "failed to save cache on close");
        }
    }
}

/// Empty or zero-like JSON values that must not count as cached results.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().map(|n| n == 0.0).unwrap_or(false),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
