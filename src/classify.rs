use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Category, Taxonomy};
use crate::ontology::OntologyClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MainClass {
    #[serde(rename = "main carbohydrate group")]
    MainCarbohydrateGroup,
    #[serde(rename = "other carbohydrate")]
    OtherCarbohydrate,
    #[serde(rename = "main carbohydrate derivative group")]
    MainDerivativeGroup,
    #[serde(rename = "other carbohydrate derivative")]
    OtherDerivative,
    #[serde(rename = "other")]
    Other,
}

impl MainClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MainClass::MainCarbohydrateGroup => "main carbohydrate group",
            MainClass::OtherCarbohydrate => "other carbohydrate",
            MainClass::MainDerivativeGroup => "main carbohydrate derivative group",
            MainClass::OtherDerivative => "other carbohydrate derivative",
            MainClass::Other => "other",
        }
    }
}

impl fmt::Display for MainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `main_class` is `None` exactly when the compound is outside the root
/// category; `subclass` is set whenever `main_class` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub main_class: Option<MainClass>,
    pub subclass: Option<String>,
}

impl Classification {
    pub fn unrelated() -> Self {
        Self {
            main_class: None,
            subclass: None,
        }
    }

    fn new(main_class: MainClass, subclass: impl Into<String>) -> Self {
        Self {
            main_class: Some(main_class),
            subclass: Some(subclass.into()),
        }
    }

    pub fn is_carbohydrate(&self) -> bool {
        self.main_class.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Evidence<'a> {
    Terms(&'a [String]),
    Ancestors(&'a [u64]),
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    Carbohydrate,
    Derivative,
}

impl Branch {
    fn main(&self) -> MainClass {
        match self {
            Branch::Carbohydrate => MainClass::MainCarbohydrateGroup,
            Branch::Derivative => MainClass::MainDerivativeGroup,
        }
    }

    fn other(&self) -> MainClass {
        match self {
            Branch::Carbohydrate => MainClass::OtherCarbohydrate,
            Branch::Derivative => MainClass::OtherDerivative,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    taxonomy: Taxonomy,
}

impl Classifier {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn classify<O>(&self, ontology: &mut O, evidence: Evidence<'_>) -> Classification
    where
        O: OntologyClient + ?Sized,
    {
        match evidence {
            Evidence::Terms(terms) => self.classify_terms(ontology, terms),
            Evidence::Ancestors(ids) => self.classify_ancestry(ontology, ids),
        }
    }

    fn branch_category(&self, branch: Branch) -> &Category {
        match branch {
            Branch::Carbohydrate => &self.taxonomy.carbohydrate,
            Branch::Derivative => &self.taxonomy.derivative,
        }
    }

    pub fn classify_terms<O>(&self, ontology: &mut O, terms: &[String]) -> Classification
    where
        O: OntologyClient + ?Sized,
    {
        let lowered: Vec<String> = terms.iter().map(|term| term.to_lowercase()).collect();
        let has = |name: &str| {
            let name = name.to_lowercase();
            lowered.iter().any(|term| *term == name)
        };

        if !has(&self.taxonomy.root.name) {
            return Classification::unrelated();
        }
        let branch = if has(&self.taxonomy.carbohydrate.name) {
            Branch::Carbohydrate
        } else if has(&self.taxonomy.derivative.name) {
            Branch::Derivative
        } else {
            return self.classify_terms_other(ontology, terms, &lowered);
        };
        let category = self.branch_category(branch);

        let groups = ontology.main_groups(category.id);
        for term in &lowered {
            if let Some(group) = groups.iter().find(|group| group.name.to_lowercase() == *term) {
                return Classification::new(branch.main(), group.name.clone());
            }
        }

        let children: HashSet<String> = ontology
            .children(category.id)
            .into_iter()
            .map(|relation| relation.child_name.to_lowercase())
            .collect();
        for (term, lower) in terms.iter().zip(&lowered) {
            if children.contains(lower) {
                return Classification::new(branch.other(), term.clone());
            }
        }

        debug!(category = %category.name, "no direct child in terms; using category label");
        Classification::new(branch.other(), category.name.clone())
    }

    fn classify_terms_other<O>(
        &self,
        ontology: &mut O,
        terms: &[String],
        lowered: &[String],
    ) -> Classification
    where
        O: OntologyClient + ?Sized,
    {
        let root = &self.taxonomy.root;
        let root_lower = root.name.to_lowercase();
        let children: HashSet<String> = ontology
            .children(root.id)
            .into_iter()
            .map(|relation| relation.child_name.to_lowercase())
            .collect();
        for (term, lower) in terms.iter().zip(lowered) {
            if *lower != root_lower && children.contains(lower) {
                return Classification::new(MainClass::Other, term.clone());
            }
        }
        Classification::new(MainClass::Other, root.name.clone())
    }

    /// Exact id matching over an ancestor set. The first ancestor that is a
    /// direct child of the chosen category decides main group vs other.
    pub fn classify_ancestry<O>(&self, ontology: &mut O, ancestors: &[u64]) -> Classification
    where
        O: OntologyClient + ?Sized,
    {
        let has = |id: u64| ancestors.contains(&id);
        if !has(self.taxonomy.root.id) {
            return Classification::unrelated();
        }
        let branch = if has(self.taxonomy.carbohydrate.id) {
            Branch::Carbohydrate
        } else if has(self.taxonomy.derivative.id) {
            Branch::Derivative
        } else {
            return self.classify_ancestry_other(ontology, ancestors);
        };
        let category = self.branch_category(branch);

        let children: HashMap<u64, String> = ontology
            .children(category.id)
            .into_iter()
            .map(|relation| (relation.child_id, relation.child_name))
            .collect();
        let main_ids: HashSet<u64> = ontology
            .main_groups(category.id)
            .into_iter()
            .map(|group| group.id)
            .collect();

        for id in ancestors {
            if let Some(name) = children.get(id) {
                let class = if main_ids.contains(id) {
                    branch.main()
                } else {
                    branch.other()
                };
                return Classification::new(class, name.clone());
            }
        }

        debug!(category = %category.name, "no direct child among ancestors; using category label");
        Classification::new(branch.other(), category.name.clone())
    }

    fn classify_ancestry_other<O>(&self, ontology: &mut O, ancestors: &[u64]) -> Classification
    where
        O: OntologyClient + ?Sized,
    {
        let root = &self.taxonomy.root;
        let children: HashMap<u64, String> = ontology
            .children(root.id)
            .into_iter()
            .map(|relation| (relation.child_id, relation.child_name))
            .collect();
        ancestors
            .iter()
            .filter(|id| **id != root.id)
            .find_map(|id| children.get(id))
            .map(|name| Classification::new(MainClass::Other, name.clone()))
            .unwrap_or_else(|| Classification::new(MainClass::Other, root.name.clone()))
    }
}
