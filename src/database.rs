use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{Settings, secs};
use crate::domain::IdentifierKind;
use crate::error::CarbotaxError;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::tracker::ServerErrorTracker;
use crate::transport::{Gateway, Request, Transport};

const PROPERTY_FIELDS: &str =
    "MolecularFormula,MolecularWeight,InChI,InChIKey,CanonicalSMILES,IUPACName";
const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundProperties {
    pub cid: u64,
    pub name: String,
    pub formula: Option<String>,
    pub molecular_weight: Option<f64>,
    pub inchi: Option<String>,
    pub inchikey: Option<String>,
    pub smiles: Option<String>,
}

pub trait CompoundClient {
    /// `Ok(None)` when the database knows no compound for the identifier.
    fn resolve_cid(
        &mut self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<u64>, CarbotaxError>;

    fn fetch_properties(&mut self, cids: &[u64]) -> Result<Vec<CompoundProperties>, CarbotaxError>;

    fn fetch_synonyms(&mut self, cid: u64) -> Result<Vec<String>, CarbotaxError>;

    fn fetch_classification(&mut self, cid: u64) -> Result<Vec<Value>, CarbotaxError>;
}

pub struct CompoundHttpClient<T: Transport> {
    gateway: Gateway<T>,
    base_url: String,
}

impl<T: Transport> CompoundHttpClient<T> {
    pub fn new(transport: T, settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        let gateway = Gateway::new(
            transport,
            Box::new(RateLimiter::new(
                secs(settings.rate_limit.initial_delay_secs),
                clock.clone(),
            )),
            RetryPolicy::from_settings(&settings.retry),
            ServerErrorTracker::new(&settings.server_errors, clock.clone()),
            clock,
        );
        Self {
            gateway,
            base_url: settings.database_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn gateway(&self) -> &Gateway<T> {
        &self.gateway
    }
}

impl<T: Transport> CompoundClient for CompoundHttpClient<T> {
    fn resolve_cid(
        &mut self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<u64>, CarbotaxError> {
        let request = Request::PostForm {
            url: format!("{}/compound/{kind}/cids/JSON", self.base_url),
            fields: vec![(kind.as_str().to_string(), identifier.to_string())],
        };
        let cid = self
            .gateway
            .fetch_json(&request)?
            .and_then(|raw| parse_cid_list(&raw).into_iter().next());
        debug!(identifier, %kind, ?cid, "resolved identifier");
        Ok(cid)
    }

    fn fetch_properties(&mut self, cids: &[u64]) -> Result<Vec<CompoundProperties>, CarbotaxError> {
        if cids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = cids
            .iter()
            .map(|cid| cid.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let request = Request::PostForm {
            url: format!(
                "{}/compound/cid/property/{PROPERTY_FIELDS}/JSON",
                self.base_url
            ),
            fields: vec![("cid".to_string(), joined)],
        };
        let properties = self
            .gateway
            .fetch_json(&request)?
            .map(|raw| parse_properties(&raw))
            .unwrap_or_default();
        debug!(requested = cids.len(), received = properties.len(), "fetched properties");
        Ok(properties)
    }

    fn fetch_synonyms(&mut self, cid: u64) -> Result<Vec<String>, CarbotaxError> {
        let request = Request::Get(format!("{}/compound/cid/{cid}/synonyms/JSON", self.base_url));
        Ok(self
            .gateway
            .fetch_json(&request)?
            .map(|raw| parse_synonyms(&raw))
            .unwrap_or_default())
    }

    fn fetch_classification(&mut self, cid: u64) -> Result<Vec<Value>, CarbotaxError> {
        let request = Request::Get(format!(
            "{}/compound/cid/{cid}/classification/JSON",
            self.base_url
        ));
        Ok(self
            .gateway
            .fetch_json(&request)?
            .map(|raw| parse_hierarchies(&raw))
            .unwrap_or_default())
    }
}

pub fn parse_cid_list(raw: &Value) -> Vec<u64> {
    raw.pointer("/IdentifierList/CID")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_u64)
                .filter(|cid| *cid != 0)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_properties(raw: &Value) -> Vec<CompoundProperties> {
    let Some(rows) = raw.pointer("/PropertyTable/Properties").and_then(Value::as_array) else {
        warn!("property response has no PropertyTable");
        return Vec::new();
    };
    rows.iter().filter_map(parse_property_row).collect()
}

fn parse_property_row(row: &Value) -> Option<CompoundProperties> {
    let cid = row.get("CID").and_then(Value::as_u64).filter(|cid| *cid != 0)?;
    let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
    let molecular_weight = match row.get("MolecularWeight") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    Some(CompoundProperties {
        cid,
        name: text("IUPACName").unwrap_or_else(|| UNKNOWN_NAME.to_string()),
        formula: text("MolecularFormula"),
        molecular_weight,
        inchi: text("InChI"),
        inchikey: text("InChIKey"),
        smiles: text("CanonicalSMILES")
            .or_else(|| text("SMILES"))
            .or_else(|| text("ConnectivitySMILES")),
    })
}

pub fn parse_synonyms(raw: &Value) -> Vec<String> {
    raw.pointer("/InformationList/Information/0/Synonym")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_hierarchies(raw: &Value) -> Vec<Value> {
    raw.pointer("/Hierarchies/Hierarchy")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|hierarchy| hierarchy.get("Node").is_some())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct OntologyKeyPattern {
    regex: Regex,
}

impl OntologyKeyPattern {
    pub fn new(prefix: &str) -> Result<Self, CarbotaxError> {
        let invalid = |message: String| CarbotaxError::InvalidKeyPrefix {
            prefix: prefix.to_string(),
            message,
        };
        let trimmed = prefix.trim();
        if trimmed.is_empty() {
            return Err(invalid("prefix is empty".to_string()));
        }
        let pattern = format!(r"(?i)^{}[:\s]+(\d+)$", regex::escape(trimmed));
        let regex = Regex::new(&pattern).map_err(|err| invalid(err.to_string()))?;
        Ok(Self { regex })
    }

    pub fn extract<S: AsRef<str>>(&self, synonyms: &[S]) -> Option<u64> {
        synonyms.iter().find_map(|synonym| {
            self.regex
                .captures(synonym.as_ref().trim())
                .and_then(|captures| captures.get(1))
                .and_then(|digits| digits.as_str().parse::<u64>().ok())
        })
    }
}

/// Pre-order term names from every hierarchy whose `SourceName` contains
/// `source_name` (case-insensitive).
pub fn extract_ontology_terms(hierarchies: &[Value], source_name: &str) -> Vec<String> {
    let wanted = source_name.to_lowercase();
    let mut terms = Vec::new();
    for hierarchy in hierarchies {
        let source = hierarchy
            .get("SourceName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if !source.contains(&wanted) {
            continue;
        }
        if let Some(nodes) = hierarchy.get("Node") {
            collect_node_terms(nodes, &mut terms);
        }
    }
    terms
}

fn collect_node_terms(roots: &Value, terms: &mut Vec<String>) {
    let mut stack: Vec<&Value> = Vec::new();
    push_nodes(roots, &mut stack);
    while let Some(node) = stack.pop() {
        let Some(object) = node.as_object() else {
            continue;
        };
        if let Some(name) = object
            .get("Information")
            .and_then(|info| info.get("Name"))
            .and_then(term_string)
        {
            terms.push(name);
        }
        if let Some(children) = object.get("Children").and_then(|c| c.get("Node")) {
            push_nodes(children, &mut stack);
        }
    }
}

// Reversed so the first child is popped first.
fn push_nodes<'a>(nodes: &'a Value, stack: &mut Vec<&'a Value>) {
    match nodes {
        Value::Array(items) => stack.extend(items.iter().rev()),
        other => stack.push(other),
    }
}

pub fn term_string(term: &Value) -> Option<String> {
    match term {
        Value::String(text) => Some(text.clone()),
        Value::Object(object) => object
            .get("StringWithMarkup")
            .and_then(|inner| inner.get("String"))
            .or_else(|| object.get("String"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_pattern_is_anchored_and_case_insensitive() {
        let pattern = OntologyKeyPattern::new("CHEBI").unwrap();
        let synonyms = ["glucose", "not CHEBI:1", " chebi 15365 ", "CHEBI:4167"];
        assert_eq!(pattern.extract(&synonyms), Some(15365));
        assert_eq!(pattern.extract(&["CHEBI:abc"]), None);
    }

    #[test]
    fn blank_prefix_is_rejected() {
        let err = OntologyKeyPattern::new("  ").unwrap_err();
        assert!(matches!(err, CarbotaxError::InvalidKeyPrefix { .. }));
        assert!(err.to_string().contains("taxonomy.key_prefix"));
    }

    #[test]
    fn term_string_unwraps_markup() {
        assert_eq!(term_string(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(
            term_string(&json!({"StringWithMarkup": {"String": "wrapped"}})).as_deref(),
            Some("wrapped")
        );
        assert_eq!(term_string(&json!({"String": "bare"})).as_deref(), Some("bare"));
        assert_eq!(term_string(&json!(null)), None);
    }
}
