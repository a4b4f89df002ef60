use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_SAVE_BATCH_SIZE};
use crate::error::CarbotaxError;
use crate::ontology::DEFAULT_MAX_DEPTH;

pub const DEFAULT_CONFIG_FILE: &str = "carbotax.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_base_url: String,
    pub ontology_base_url: String,
    pub taxonomy: Taxonomy,
    pub request_timeout_secs: f64,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub server_errors: ServerErrorSettings,
    pub cache: CacheSettings,
    pub chunk_size: usize,
    pub max_ancestor_depth: usize,
    pub max_synonyms: usize,
    pub failed_dir: Option<Utf8PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_base_url: "https://pubchem.ncbi.nlm.nih.gov/rest/pug".to_string(),
            ontology_base_url: "https://www.ebi.ac.uk/chebi/backend/api/public".to_string(),
            taxonomy: Taxonomy::default(),
            request_timeout_secs: 30.0,
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            server_errors: ServerErrorSettings::default(),
            cache: CacheSettings::default(),
            chunk_size: 512,
            max_ancestor_depth: DEFAULT_MAX_DEPTH,
            max_synonyms: 20,
            failed_dir: None,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_secs)
    }

    pub fn failed_dir(&self) -> Utf8PathBuf {
        self.failed_dir
            .clone()
            .unwrap_or_else(|| self.cache.dir.join("failed"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    pub root: Category,
    pub carbohydrate: Category,
    pub derivative: Category,
    /// Prefix of the ontology key found among compound synonyms (`CHEBI:15365`).
    pub key_prefix: String,
    /// Substring identifying the ontology's hierarchy in classification responses.
    pub source_name: String,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            root: Category::new(78616, "carbohydrates and carbohydrate derivatives"),
            carbohydrate: Category::new(16646, "carbohydrate"),
            derivative: Category::new(63299, "carbohydrate derivative"),
            key_prefix: "CHEBI".to_string(),
            source_name: "chebi".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

impl Category {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub initial_delay_secs: f64,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub increase_factor: f64,
    pub decrease_factor: f64,
    pub success_threshold: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: 0.2,
            min_delay_secs: 0.1,
            max_delay_secs: 2.0,
            increase_factor: 2.0,
            decrease_factor: 0.9,
            success_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerErrorSettings {
    pub history_size: usize,
    pub window_secs: f64,
    pub threshold: usize,
    pub cooldown_secs: f64,
}

impl Default for ServerErrorSettings {
    fn default() -> Self {
        Self {
            history_size: 100,
            window_secs: 60.0,
            threshold: 10,
            cooldown_secs: 180.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub dir: Utf8PathBuf,
    pub max_entries: usize,
    pub save_batch_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            max_entries: DEFAULT_MAX_ENTRIES,
            save_batch_size: DEFAULT_SAVE_BATCH_SIZE,
        }
    }
}

pub fn default_cache_dir() -> Utf8PathBuf {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("carbotax")).ok()
        })
        .unwrap_or_else(|| Utf8PathBuf::from(".carbotax-cache"))
}

pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, CarbotaxError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CarbotaxError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Settings, CarbotaxError> {
        serde_json::from_str(content).map_err(|err| CarbotaxError::ConfigParse(err.to_string()))
    }
}
