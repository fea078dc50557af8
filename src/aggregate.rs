//! Result aggregation: top concept join, per-term summaries and CSV output.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::odds::OddsRow;
use crate::ontology::Ontology;

/// One output row: an odds ratio tagged with one of the term's top concepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub term: String,
    pub fold: usize,
    #[serde(serialize_with = "empty_if_nan")]
    pub bf: f64,
    #[serde(rename = "topConcept")]
    pub top_concept: String,
}

/// Per (term, top concept) statistics of the odds ratio across folds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub term: String,
    #[serde(rename = "topConcept")]
    pub top_concept: String,
    #[serde(serialize_with = "empty_if_nan")]
    pub mean: f64,
    #[serde(serialize_with = "empty_if_nan")]
    pub std: f64,
    #[serde(serialize_with = "empty_if_nan")]
    pub skew: f64,
}

//Missing values are written as empty cells
fn empty_if_nan<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_none()
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Left join of the odds rows with the ontology: one record per top concept,
/// or a single record with an empty top concept when the term is unmapped.
pub fn join_concepts(rows: &[OddsRow], ontology: &Ontology) -> Vec<ResultRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let concepts = ontology.top_concepts(&row.term);
        if concepts.is_empty() {
            records.push(ResultRecord {
                term: row.term.clone(),
                fold: row.fold,
                bf: row.bf,
                top_concept: String::new(),
            });
        }
        for concept in concepts {
            records.push(ResultRecord {
                term: row.term.clone(),
                fold: row.fold,
                bf: row.bf,
                top_concept: concept.clone(),
            });
        }
    }
    records
}

/// Mean, sample standard deviation and adjusted skewness, NaN values skipped.
/// std needs two values and skew three; otherwise they are NaN. A constant
/// sample has skew 0.
pub fn describe(values: &[f64]) -> (f64, f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = finite.len() as f64;
    if finite.is_empty() {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let mean = finite.iter().sum::<f64>() / n;
    let m2: f64 = finite.iter().map(|v| (v - mean).powi(2)).sum();
    let m3: f64 = finite.iter().map(|v| (v - mean).powi(3)).sum();

    let std = if finite.len() < 2 {
        f64::NAN
    } else {
        (m2 / (n - 1.0)).sqrt()
    };
    let skew = if finite.len() < 3 {
        f64::NAN
    } else if m2 == 0.0 {
        0.0
    } else {
        (n * (n - 1.0).sqrt() / (n - 2.0)) * (m3 / m2.powf(1.5))
    };
    (mean, std, skew)
}

/// Groups by (term, top concept) and sorts by mean, highest first. Ties keep the
/// order in which the groups first appear; NaN means go last.
pub fn summarize(records: &[ResultRecord]) -> Vec<SummaryRecord> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<f64>> = HashMap::new();
    for record in records {
        let key = (record.term.clone(), record.top_concept.clone());
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(record.bf);
    }

    let mut summary: Vec<SummaryRecord> = order
        .into_iter()
        .map(|key| {
            let (mean, std, skew) = describe(&groups[&key]);
            SummaryRecord {
                term: key.0,
                top_concept: key.1,
                mean,
                std,
                skew,
            }
        })
        .collect();

    //sort_by is stable, which keeps ties in insertion order
    summary.sort_by(|a, b| match (a.mean.is_nan(), b.mean.is_nan()) {
        (false, false) => b.mean.partial_cmp(&a.mean).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    });
    summary
}

fn write_csv<P: AsRef<Path>, R: Serialize>(path: P, rows: &[R], headers: &[&str]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        writer.write_record(headers)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_results<P: AsRef<Path>>(path: P, records: &[ResultRecord]) -> Result<()> {
    write_csv(path, records, &["term", "fold", "bf", "topConcept"])
}

pub fn write_summary<P: AsRef<Path>>(path: P, summary: &[SummaryRecord]) -> Result<()> {
    write_csv(path, summary, &["term", "topConcept", "mean", "std", "skew"])
}
