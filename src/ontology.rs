//! Ontology term normalization: lowercased concept labels and their top concepts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{debug, info};

use crate::corpus::{open_table, TermAssociation};
use crate::error::{Error, Result};

/// Term to top concept mapping, keyed by the lowercased label.
#[derive(Debug, Clone, Default)]
pub struct Ontology {
    concepts: BTreeMap<String, Vec<String>>,
}

impl Ontology {
    /// Builds the mapping from (label, top concept) pairs. Labels are lowercased;
    /// duplicate pairs collapse.
    pub fn from_pairs<I, L, C>(pairs: I) -> Ontology
    where
        I: IntoIterator<Item = (L, C)>,
        L: AsRef<str>,
        C: Into<String>,
    {
        let mut concepts: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (label, concept) in pairs {
            let entry = concepts.entry(label.as_ref().to_lowercase()).or_default();
            let concept = concept.into();
            if !entry.contains(&concept) {
                entry.push(concept);
            }
        }
        Ontology { concepts }
    }

    /// Reads a flattened `label` / `topConcept` table (tab or comma separated).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Ontology> {
        let path = path.as_ref();
        let mut reader = open_table(path)?;
        let headers = reader.headers()?.clone();
        let column = |names: &[&str]| headers.iter().position(|h| names.contains(&h));
        let label_col = column(&["label", "term", "name"])
            .ok_or_else(|| Error::input(format!("{}: missing a 'label' column", path.display())))?;
        let concept_col = column(&["topConcept", "top_concept", "cp"]).ok_or_else(|| {
            Error::input(format!("{}: missing a 'topConcept' column", path.display()))
        })?;

        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let (Some(label), Some(concept)) = (record.get(label_col), record.get(concept_col)) {
                if !label.is_empty() {
                    pairs.push((label.to_string(), concept.to_string()));
                }
            }
        }
        let ontology = Ontology::from_pairs(pairs);
        info!(
            "Loaded {} ontology terms from {}",
            ontology.concepts.len(),
            path.display()
        );
        Ok(ontology)
    }

    pub fn contains(&self, term: &str) -> bool {
        self.concepts.contains_key(term)
    }

    pub fn top_concepts(&self, term: &str) -> &[String] {
        self.concepts.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Keeps the associations whose term is an ontology concept, deduplicated.
    pub fn filter_terms(&self, terms: &[TermAssociation]) -> Vec<TermAssociation> {
        let kept: BTreeSet<TermAssociation> = terms
            .iter()
            .filter(|a| self.contains(&a.term))
            .cloned()
            .collect();
        debug!("{} of {} term associations matched the ontology", kept.len(), terms.len());
        kept.into_iter().collect()
    }
}
