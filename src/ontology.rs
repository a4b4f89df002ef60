use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::cache::PersistentCache;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::CarbotaxError;
use crate::rate_limit::AdaptiveRateLimiter;
use crate::retry::RetryPolicy;
use crate::tracker::ServerErrorTracker;
use crate::transport::{Gateway, Request, Transport};

pub const IS_A: &str = "is a";
pub const DEFAULT_MAX_DEPTH: usize = 20;

pub const CHILDREN_CACHE_FILE: &str = "ontology_children_cache.json";
pub const PARENTS_CACHE_FILE: &str = "ontology_parents_cache.json";
pub const ANCESTORS_CACHE_FILE: &str = "ontology_ancestors_cache.json";

// On the wire `init_*` is the child end and `final_*` the parent end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyRelation {
    #[serde(rename = "init_id", deserialize_with = "lenient_id")]
    pub child_id: u64,
    #[serde(rename = "init_name", default)]
    pub child_name: String,
    #[serde(rename = "relation_type")]
    pub relation_kind: String,
    #[serde(rename = "final_id", deserialize_with = "lenient_id")]
    pub parent_id: u64,
    #[serde(rename = "final_name", default)]
    pub parent_name: String,
}

impl OntologyRelation {
    pub fn is_hierarchical(&self) -> bool {
        self.relation_kind == IS_A
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ontology id {number}"))),
        Value::String(text) => text
            .trim()
            .trim_start_matches("CHEBI:")
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid ontology id {text}"))),
        other => Err(serde::de::Error::custom(format!(
            "invalid ontology id {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainGroup {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Children,
    Parents,
}

impl Direction {
    fn path(&self) -> &'static str {
        match self {
            Direction::Children => "children",
            Direction::Parents => "parents",
        }
    }

    fn relations_key(&self) -> &'static str {
        match self {
            Direction::Children => "incoming_relations",
            Direction::Parents => "outgoing_relations",
        }
    }
}

pub trait OntologyClient {
    fn children(&mut self, id: u64) -> Vec<OntologyRelation>;

    fn parents(&mut self, id: u64) -> Vec<OntologyRelation>;

    /// Like `parents`, but a failed lookup is an error instead of no edges.
    fn try_parents(&mut self, id: u64) -> Result<Vec<OntologyRelation>, CarbotaxError> {
        Ok(self.parents(id))
    }

    /// Sorted ids reachable upward from `id`, including `id` itself.
    fn ancestors(&mut self, id: u64) -> Result<Vec<u64>, CarbotaxError>;

    fn main_groups(&mut self, id: u64) -> Vec<MainGroup> {
        let children = self.children(id);
        let mut groups = Vec::new();
        for child in children {
            if child.child_id == 0 {
                continue;
            }
            if self.children(child.child_id).len() > 1 {
                groups.push(MainGroup {
                    id: child.child_id,
                    name: child.child_name,
                });
            }
        }
        groups
    }

    fn persist(&mut self) {}
}

/// Breadth-first walk up the parent edges, bounded by `max_depth` rounds.
/// The first failed parent lookup aborts the walk.
pub fn collect_ancestors<O: OntologyClient + ?Sized>(
    source: &mut O,
    id: u64,
    max_depth: usize,
) -> Result<Vec<u64>, CarbotaxError> {
    let mut ancestors = BTreeSet::from([id]);
    let mut visited = HashSet::new();
    let mut frontier = vec![id];
    let mut depth = 0usize;

    while !frontier.is_empty() && depth < max_depth {
        let current = std::mem::take(&mut frontier);
        for node in current {
            if !visited.insert(node) {
                continue;
            }
            for relation in source.try_parents(node)? {
                let parent = relation.parent_id;
                if parent != 0 && ancestors.insert(parent) {
                    frontier.push(parent);
                }
            }
        }
        depth += 1;
    }
    if !frontier.is_empty() {
        debug!(id, max_depth, "ancestor traversal stopped at depth limit");
    }
    Ok(ancestors.into_iter().collect())
}

pub fn parse_relations(raw: &Value, direction: Direction) -> Vec<OntologyRelation> {
    let Some(items) = raw
        .get("ontology_relations")
        .and_then(|value| value.get(direction.relations_key()))
        .and_then(|value| value.as_array())
    else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| item.get("relation_type").and_then(|v| v.as_str()) == Some(IS_A))
        .filter_map(|item| match serde_json::from_value::<OntologyRelation>(item.clone()) {
            Ok(relation) => Some(relation),
            Err(err) => {
                warn!(%err, "skipping malformed ontology relation");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub items: usize,
    pub path: Option<String>,
}

pub struct OntologyHttpClient<T: Transport> {
    gateway: Gateway<T>,
    base_url: String,
    max_depth: usize,
    children_cache: PersistentCache<u64, Vec<OntologyRelation>>,
    parents_cache: PersistentCache<u64, Vec<OntologyRelation>>,
    ancestors_cache: PersistentCache<u64, Vec<u64>>,
}

impl<T: Transport> OntologyHttpClient<T> {
    pub fn new(transport: T, settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        let gateway = Gateway::new(
            transport,
            Box::new(AdaptiveRateLimiter::new(&settings.rate_limit, clock.clone())),
            RetryPolicy::from_settings(&settings.retry),
            ServerErrorTracker::new(&settings.server_errors, clock.clone()),
            clock,
        );
        let cache = &settings.cache;
        let open = |file: &str| -> PersistentCache<u64, Vec<OntologyRelation>> {
            if cache.enabled {
                PersistentCache::open(cache.dir.join(file), cache.max_entries, cache.save_batch_size)
            } else {
                PersistentCache::in_memory(cache.max_entries)
            }
        };
        let children_cache = open(CHILDREN_CACHE_FILE);
        let parents_cache = open(PARENTS_CACHE_FILE);
        let ancestors_cache = if cache.enabled {
            PersistentCache::open(
                cache.dir.join(ANCESTORS_CACHE_FILE),
                cache.max_entries,
                cache.save_batch_size,
            )
        } else {
            PersistentCache::in_memory(cache.max_entries)
        };

        Self {
            gateway,
            base_url: settings.ontology_base_url.trim_end_matches('/').to_string(),
            max_depth: settings.max_ancestor_depth,
            children_cache,
            parents_cache,
            ancestors_cache,
        }
    }

    pub fn gateway(&self) -> &Gateway<T> {
        &self.gateway
    }

    fn relations_url(&self, direction: Direction, id: u64) -> String {
        format!("{}/ontology/{}/{id}/", self.base_url, direction.path())
    }

    fn fetch_relations(
        &mut self,
        direction: Direction,
        id: u64,
    ) -> Result<Vec<OntologyRelation>, CarbotaxError> {
        let request = Request::Get(self.relations_url(direction, id));
        let Some(raw) = self.gateway.fetch_json(&request)? else {
            return Ok(Vec::new());
        };
        Ok(parse_relations(&raw, direction))
    }

    fn relations_cache(
        &mut self,
        direction: Direction,
    ) -> &mut PersistentCache<u64, Vec<OntologyRelation>> {
        match direction {
            Direction::Children => &mut self.children_cache,
            Direction::Parents => &mut self.parents_cache,
        }
    }

    fn lookup_relations(
        &mut self,
        direction: Direction,
        id: u64,
    ) -> Result<Vec<OntologyRelation>, CarbotaxError> {
        if let Some(hit) = self.relations_cache(direction).get(&id) {
            debug!(id, direction = direction.path(), "ontology cache hit");
            return Ok(hit.clone());
        }

        let relations = self.fetch_relations(direction, id)?;
        debug!(id, direction = direction.path(), count = relations.len(), "fetched relations");
        if !relations.is_empty() {
            self.relations_cache(direction).set(id, relations.clone());
        }
        Ok(relations)
    }

    fn cached_relations(&mut self, direction: Direction, id: u64) -> Vec<OntologyRelation> {
        match self.lookup_relations(direction, id) {
            Ok(relations) => relations,
            Err(CarbotaxError::Interrupted) => {
                debug!(id, direction = direction.path(), "ontology lookup interrupted");
                Vec::new()
            }
            Err(err) => {
                error!(id, direction = direction.path(), %err, "ontology lookup failed");
                Vec::new()
            }
        }
    }

    pub fn save_caches(&mut self) -> Result<(), CarbotaxError> {
        self.children_cache.save()?;
        self.parents_cache.save()?;
        self.ancestors_cache.save()?;
        Ok(())
    }

    pub fn clear_caches(&mut self) -> Result<(), CarbotaxError> {
        self.children_cache.clear()?;
        self.parents_cache.clear()?;
        self.ancestors_cache.clear()?;
        Ok(())
    }

    pub fn cache_stats(&self) -> Vec<CacheStats> {
        let path = |p: Option<&Utf8Path>| p.map(|p| p.to_string());
        vec![
            CacheStats {
                name: "children",
                entries: self.children_cache.len(),
                items: self.children_cache.iter().map(|(_, v)| v.len()).sum(),
                path: path(self.children_cache.path()),
            },
            CacheStats {
                name: "parents",
                entries: self.parents_cache.len(),
                items: self.parents_cache.iter().map(|(_, v)| v.len()).sum(),
                path: path(self.parents_cache.path()),
            },
            CacheStats {
                name: "ancestors",
                entries: self.ancestors_cache.len(),
                items: self.ancestors_cache.iter().map(|(_, v)| v.len()).sum(),
                path: path(self.ancestors_cache.path()),
            },
        ]
    }

    pub fn close(mut self) -> Result<(), CarbotaxError> {
        self.save_caches()
    }
}

impl<T: Transport> OntologyClient for OntologyHttpClient<T> {
    fn children(&mut self, id: u64) -> Vec<OntologyRelation> {
        self.cached_relations(Direction::Children, id)
    }

    fn parents(&mut self, id: u64) -> Vec<OntologyRelation> {
        self.cached_relations(Direction::Parents, id)
    }

    fn try_parents(&mut self, id: u64) -> Result<Vec<OntologyRelation>, CarbotaxError> {
        self.lookup_relations(Direction::Parents, id)
    }

    // Walks cut short by the depth limit are cached; walks with a failed
    // lookup are not.
    fn ancestors(&mut self, id: u64) -> Result<Vec<u64>, CarbotaxError> {
        if let Some(hit) = self.ancestors_cache.get(&id) {
            debug!(id, "ancestor cache hit");
            return Ok(hit.clone());
        }
        let max_depth = self.max_depth;
        let ancestors = collect_ancestors(self, id, max_depth)?;
        debug!(id, count = ancestors.len(), "computed ancestors");
        self.ancestors_cache.set(id, ancestors.clone());
        Ok(ancestors)
    }

    fn persist(&mut self) {
        if let Err(err) = self.save_caches() {
            error!(%err, "failed to save ontology caches");
        }
    }
}
