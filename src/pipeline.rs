use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::classify::{Classification, Classifier, Evidence};
use crate::config::Settings;
use crate::database::{
    CompoundClient, CompoundProperties, OntologyKeyPattern, extract_ontology_terms,
};
use crate::domain::IdentifierKind;
use crate::error::CarbotaxError;
use crate::ontology::OntologyClient;
use crate::tracker::FailureLedger;

pub use crate::clock::Interrupt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPath {
    Ancestry,
    TermList,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundRecord {
    pub identifier: String,
    pub cid: u64,
    pub name: String,
    pub formula: Option<String>,
    pub molecular_weight: Option<f64>,
    pub inchi: Option<String>,
    pub inchikey: Option<String>,
    pub smiles: Option<String>,
    pub ontology_id: Option<u64>,
    pub synonyms: Vec<String>,
    pub is_carbohydrate: bool,
    #[serde(flatten)]
    pub classification: Classification,
    pub classification_path: ClassificationPath,
    pub ontology_terms: Vec<String>,
    pub hierarchies: Vec<Value>,
    pub fast_path_error: Option<String>,
}

impl CompoundRecord {
    pub fn is_carbohydrate(&self) -> bool {
        self.classification.is_carbohydrate()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub requested: usize,
    pub resolved: usize,
    pub classified: usize,
    pub carbohydrates: usize,
    pub by_main_class: BTreeMap<String, usize>,
    pub failed_identifiers: usize,
    pub failed_cids: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub records: Vec<Option<CompoundRecord>>,
    pub summary: BatchSummary,
}

pub struct Pipeline<C, O>
where
    C: CompoundClient,
    O: OntologyClient,
{
    compounds: C,
    ontology: O,
    classifier: Classifier,
    ledger: FailureLedger,
    key_pattern: OntologyKeyPattern,
    source_name: String,
    chunk_size: usize,
    max_synonyms: usize,
    interrupt: Interrupt,
}

impl<C, O> Pipeline<C, O>
where
    C: CompoundClient,
    O: OntologyClient,
{
    pub fn new(compounds: C, ontology: O, settings: &Settings) -> Result<Self, CarbotaxError> {
        Ok(Self {
            compounds,
            ontology,
            classifier: Classifier::new(settings.taxonomy.clone()),
            ledger: FailureLedger::new(settings.failed_dir()),
            key_pattern: OntologyKeyPattern::new(&settings.taxonomy.key_prefix)?,
            source_name: settings.taxonomy.source_name.clone(),
            chunk_size: settings.chunk_size.max(1),
            max_synonyms: settings.max_synonyms,
            interrupt: Interrupt::new(),
        })
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    pub fn ontology(&self) -> &O {
        &self.ontology
    }

    pub fn ontology_mut(&mut self) -> &mut O {
        &mut self.ontology
    }

    pub fn compounds(&self) -> &C {
        &self.compounds
    }

    /// Runs one batch. On interrupt the ledger and caches are flushed on a
    /// best-effort basis before `Interrupted` is returned.
    pub fn run(
        &mut self,
        identifiers: &[String],
        kind: IdentifierKind,
    ) -> Result<BatchResult, CarbotaxError> {
        // The previous batch was flushed by `finish`; counts are per batch.
        self.ledger.clear();
        match self.run_inner(identifiers, kind) {
            Ok(result) => Ok(result),
            Err(CarbotaxError::Interrupted) => {
                warn!("batch interrupted; saving progress");
                self.finish();
                Err(CarbotaxError::Interrupted)
            }
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }

    fn run_inner(
        &mut self,
        identifiers: &[String],
        kind: IdentifierKind,
    ) -> Result<BatchResult, CarbotaxError> {
        info!(count = identifiers.len(), %kind, "starting batch");

        let cid_by_identifier = self.resolve_all(identifiers, kind)?;
        let mut cids: Vec<u64> = Vec::new();
        for identifier in identifiers {
            if let Some(cid) = cid_by_identifier.get(identifier.as_str()).copied().flatten() {
                if !cids.contains(&cid) {
                    cids.push(cid);
                }
            }
        }

        let properties = self.fetch_all_properties(&cids)?;

        let mut by_cid: HashMap<u64, CompoundRecord> = HashMap::new();
        for cid in &cids {
            self.interrupt.check()?;
            let Some(props) = properties.get(cid) else {
                debug!(cid, "no properties; skipping compound");
                continue;
            };
            match self.process_compound(props) {
                Ok(record) => {
                    by_cid.insert(*cid, record);
                }
                Err(CarbotaxError::Interrupted) => return Err(CarbotaxError::Interrupted),
                Err(err) => {
                    error!(cid, %err, "compound processing failed");
                    self.ledger.add_failed_cid(*cid);
                }
            }
        }

        let records: Vec<Option<CompoundRecord>> = identifiers
            .iter()
            .map(|identifier| {
                let cid = cid_by_identifier.get(identifier.as_str()).copied().flatten()?;
                let mut record = by_cid.get(&cid)?.clone();
                record.identifier = identifier.clone();
                Some(record)
            })
            .collect();

        let summary = self.summarize(identifiers.len(), &cid_by_identifier, &records);
        self.finish();
        info!(
            requested = summary.requested,
            resolved = summary.resolved,
            classified = summary.classified,
            carbohydrates = summary.carbohydrates,
            failed_identifiers = summary.failed_identifiers,
            failed_cids = summary.failed_cids,
            "batch complete"
        );
        Ok(BatchResult { records, summary })
    }

    fn resolve_all<'a>(
        &mut self,
        identifiers: &'a [String],
        kind: IdentifierKind,
    ) -> Result<HashMap<&'a str, Option<u64>>, CarbotaxError> {
        let mut resolved: HashMap<&'a str, Option<u64>> = HashMap::new();
        for identifier in identifiers {
            if resolved.contains_key(identifier.as_str()) {
                continue;
            }
            self.interrupt.check()?;
            let cid = match self.compounds.resolve_cid(identifier, kind) {
                Ok(Some(cid)) => Some(cid),
                Ok(None) => {
                    warn!(identifier = identifier.as_str(), %kind, "identifier not found");
                    None
                }
                Err(CarbotaxError::Interrupted) => return Err(CarbotaxError::Interrupted),
                Err(err) => {
                    error!(identifier = identifier.as_str(), %kind, %err, "identifier resolution failed");
                    None
                }
            };
            if cid.is_none() {
                self.ledger.add_failed(kind, identifier);
            }
            resolved.insert(identifier.as_str(), cid);
        }
        Ok(resolved)
    }

    fn fetch_all_properties(
        &mut self,
        cids: &[u64],
    ) -> Result<HashMap<u64, CompoundProperties>, CarbotaxError> {
        let mut properties = HashMap::new();
        for chunk in cids.chunks(self.chunk_size) {
            self.interrupt.check()?;
            match self.compounds.fetch_properties(chunk) {
                Ok(rows) => {
                    for row in rows {
                        properties.insert(row.cid, row);
                    }
                }
                Err(CarbotaxError::Interrupted) => return Err(CarbotaxError::Interrupted),
                Err(err) => {
                    error!(size = chunk.len(), %err, "property chunk failed");
                    for cid in chunk {
                        self.ledger.add_failed_cid(*cid);
                    }
                }
            }
        }
        Ok(properties)
    }

    fn process_compound(
        &mut self,
        props: &CompoundProperties,
    ) -> Result<CompoundRecord, CarbotaxError> {
        let cid = props.cid;
        let synonyms = match self.compounds.fetch_synonyms(cid) {
            Ok(synonyms) => synonyms,
            Err(CarbotaxError::Interrupted) => return Err(CarbotaxError::Interrupted),
            Err(err) => {
                warn!(cid, %err, "synonym lookup failed; continuing without ontology key");
                Vec::new()
            }
        };
        let mut ontology_id = self.key_pattern.extract(&synonyms);

        let mut fast_path_error = None;
        let mut classification = None;
        if let Some(id) = ontology_id {
            self.interrupt.check()?;
            match self.ontology.ancestors(id) {
                Ok(ancestors) => {
                    let result = self
                        .classifier
                        .classify(&mut self.ontology, Evidence::Ancestors(&ancestors));
                    if result.is_carbohydrate() {
                        classification = Some(result);
                    } else {
                        debug!(cid, ontology_id = id, "ancestry found no placement; trying term list");
                    }
                }
                Err(CarbotaxError::Interrupted) => return Err(CarbotaxError::Interrupted),
                Err(err) => {
                    warn!(cid, ontology_id = id, %err, "ancestry classification failed; falling back");
                    fast_path_error = Some(err.to_string());
                    ontology_id = None;
                }
            }
        }

        let (classification, path, ontology_terms, hierarchies) = match classification {
            Some(classification) => (
                classification,
                ClassificationPath::Ancestry,
                Vec::new(),
                Vec::new(),
            ),
            None => {
                self.interrupt.check()?;
                let hierarchies = self.compounds.fetch_classification(cid)?;
                let terms = extract_ontology_terms(&hierarchies, &self.source_name);
                let classification = self
                    .classifier
                    .classify(&mut self.ontology, Evidence::Terms(&terms));
                (classification, ClassificationPath::TermList, terms, hierarchies)
            }
        };
        debug!(
            cid,
            main_class = ?classification.main_class,
            subclass = ?classification.subclass,
            path = ?path,
            "classified compound"
        );

        let mut synonyms = synonyms;
        synonyms.truncate(self.max_synonyms);
        Ok(CompoundRecord {
            identifier: String::new(),
            cid,
            name: props.name.clone(),
            formula: props.formula.clone(),
            molecular_weight: props.molecular_weight,
            inchi: props.inchi.clone(),
            inchikey: props.inchikey.clone(),
            smiles: props.smiles.clone(),
            ontology_id,
            synonyms,
            is_carbohydrate: classification.is_carbohydrate(),
            classification,
            classification_path: path,
            ontology_terms,
            hierarchies,
            fast_path_error,
        })
    }

    fn summarize(
        &self,
        requested: usize,
        cid_by_identifier: &HashMap<&str, Option<u64>>,
        records: &[Option<CompoundRecord>],
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            requested,
            resolved: cid_by_identifier.values().filter(|cid| cid.is_some()).count(),
            failed_identifiers: self.ledger.failed_count(None),
            failed_cids: self.ledger.failed_cids().len(),
            ..BatchSummary::default()
        };
        for record in records.iter().flatten() {
            summary.classified += 1;
            if let Some(main_class) = record.classification.main_class {
                summary.carbohydrates += 1;
                *summary
                    .by_main_class
                    .entry(main_class.as_str().to_string())
                    .or_default() += 1;
            }
        }
        summary
    }

    fn finish(&mut self) {
        let written = self.ledger.flush();
        if !written.is_empty() {
            info!(files = written.len(), dir = %self.ledger.dir(), "failure ledger saved");
        }
        self.ontology.persist();
    }
}
