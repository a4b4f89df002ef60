use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{ServerErrorSettings, secs};
use crate::domain::IdentifierKind;
use crate::error::CarbotaxError;
use crate::fs_util::{unique_json_path, write_json_atomic};

pub struct ServerErrorTracker {
    history: VecDeque<Instant>,
    capacity: usize,
    window: Duration,
    threshold: usize,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl ServerErrorTracker {
    pub fn new(settings: &ServerErrorSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            history: VecDeque::with_capacity(settings.history_size),
            capacity: settings.history_size.max(1),
            window: secs(settings.window_secs),
            threshold: settings.threshold.max(1),
            cooldown: secs(settings.cooldown_secs),
            clock,
        }
    }

    /// Records one server error. Returns `true` when the cooldown was taken.
    pub fn record_error(&mut self) -> bool {
        let now = self.clock.now();
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(now);

        let recent = self.recent_error_count_at(now);
        if recent < self.threshold {
            return false;
        }

        warn!(
            recent,
            window_secs = self.window.as_secs_f64(),
            cooldown_secs = self.cooldown.as_secs_f64(),
            "high server error rate; cooling down"
        );
        self.clock.sleep(self.cooldown);
        self.reset();
        true
    }

    pub fn recent_error_count(&self) -> usize {
        self.recent_error_count_at(self.clock.now())
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn recent_error_count_at(&self, now: Instant) -> usize {
        self.history
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= self.window)
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierSnapshot {
    pub timestamp: String,
    pub identifier_type: IdentifierKind,
    pub count: usize,
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidSnapshot {
    pub timestamp: String,
    pub count: usize,
    pub cids: Vec<u64>,
}

#[derive(Debug, Default)]
struct FailedList<T> {
    values: Vec<T>,
    saved: usize,
}

impl<T: PartialEq> FailedList<T> {
    fn push(&mut self, value: T) -> bool {
        if self.values.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    fn has_pending(&self) -> bool {
        self.values.len() > self.saved
    }
}

#[derive(Debug)]
pub struct FailureLedger {
    dir: Utf8PathBuf,
    identifiers: BTreeMap<IdentifierKind, FailedList<String>>,
    cids: FailedList<u64>,
}

impl FailureLedger {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            identifiers: BTreeMap::new(),
            cids: FailedList::default(),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn add_failed(&mut self, kind: IdentifierKind, identifier: &str) {
        let list = self.identifiers.entry(kind).or_default();
        if list.push(identifier.to_string()) {
            debug!(%kind, identifier, "recorded failed identifier");
        }
    }

    pub fn add_failed_cid(&mut self, cid: u64) {
        if self.cids.push(cid) {
            debug!(cid, "recorded failed cid");
        }
    }

    pub fn failed(&self, kind: IdentifierKind) -> &[String] {
        self.identifiers
            .get(&kind)
            .map(|list| list.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn failed_cids(&self) -> &[u64] {
        &self.cids.values
    }

    pub fn failed_count(&self, kind: Option<IdentifierKind>) -> usize {
        match kind {
            Some(kind) => self.failed(kind).len(),
            None => self.identifiers.values().map(|list| list.values.len()).sum(),
        }
    }

    pub fn save(&mut self, kind: IdentifierKind) -> Result<Option<Utf8PathBuf>, CarbotaxError> {
        let Some(list) = self.identifiers.get_mut(&kind) else {
            return Ok(None);
        };
        if !list.has_pending() {
            return Ok(None);
        }

        let timestamp = timestamp();
        let snapshot = IdentifierSnapshot {
            timestamp: timestamp.clone(),
            identifier_type: kind,
            count: list.values.len(),
            identifiers: list.values.clone(),
        };
        let path = unique_json_path(&self.dir, &format!("failed_{kind}_{timestamp}"));
        write_json_atomic(&path, &snapshot)?;
        list.saved = list.values.len();
        info!(count = snapshot.count, %kind, path = %path, "saved failed identifiers");
        Ok(Some(path))
    }

    pub fn save_failed_cids(&mut self) -> Result<Option<Utf8PathBuf>, CarbotaxError> {
        if !self.cids.has_pending() {
            return Ok(None);
        }
        let timestamp = timestamp();
        let snapshot = CidSnapshot {
            timestamp: timestamp.clone(),
            count: self.cids.values.len(),
            cids: self.cids.values.clone(),
        };
        let path = unique_json_path(&self.dir, &format!("failed_cids_{timestamp}"));
        write_json_atomic(&path, &snapshot)?;
        self.cids.saved = self.cids.values.len();
        info!(count = snapshot.count, path = %path, "saved failed cids");
        Ok(Some(path))
    }

    /// Saves every kind and the CID list; write failures are logged, not returned.
    pub fn flush(&mut self) -> Vec<Utf8PathBuf> {
        let kinds: Vec<IdentifierKind> = self.identifiers.keys().copied().collect();
        let mut written = Vec::new();
        for kind in kinds {
            match self.save(kind) {
                Ok(Some(path)) => written.push(path),
                Ok(None) => {}
                Err(err) => error!(%kind, %err, "failed to save failed identifiers"),
            }
        }
        match self.save_failed_cids() {
            Ok(Some(path)) => written.push(path),
            Ok(None) => {}
            Err(err) => error!(%err, "failed to save failed cids"),
        }
        written
    }

    pub fn clear(&mut self) {
        self.identifiers.clear();
        self.cids = FailedList::default();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
