//! Meta-analysis corpus: reported peaks and term-study associations.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use log::{info, warn};
use serde::Deserialize;

use crate::coords::{CoordinateMapper, Voxel};
use crate::error::{Error, Result};

pub type StudyId = u64;

/// One reported activation peak in world (mm) coordinates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Peak {
    #[serde(alias = "pmid", alias = "study_id")]
    pub id: StudyId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A peak moved onto the reference grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Activation {
    pub study: StudyId,
    pub voxel: Voxel,
}

/// A study reporting a term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermAssociation {
    pub study: StudyId,
    pub term: String,
}

impl TermAssociation {
    pub fn new(study: StudyId, term: impl Into<String>) -> TermAssociation {
        TermAssociation {
            study,
            term: term.into(),
        }
    }
}

/// Activations and term associations, joined on study id during analysis.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub activations: Vec<Activation>,
    pub terms: Vec<TermAssociation>,
}

impl Corpus {
    pub fn new(activations: Vec<Activation>, terms: Vec<TermAssociation>) -> Corpus {
        Corpus { activations, terms }
    }

    /// Maps the peaks through `mapper` and pairs them with `terms`.
    pub fn from_peaks(peaks: &[Peak], terms: Vec<TermAssociation>, mapper: &CoordinateMapper) -> Corpus {
        let activations = peaks
            .iter()
            .map(|peak| Activation {
                study: peak.id,
                voxel: mapper.to_voxel([peak.x, peak.y, peak.z]),
            })
            .collect();
        Corpus { activations, terms }
    }

    /// The document universe: distinct studies with at least one peak, ascending.
    pub fn universe(&self) -> Vec<StudyId> {
        self.activations
            .iter()
            .map(|a| a.study)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

//Tab separated unless the header line only has commas
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    if !first.contains('\t') && first.contains(',') {
        Ok(b',')
    } else {
        Ok(b'\t')
    }
}

pub(crate) fn open_table(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = sniff_delimiter(path)?;
    let reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    Ok(reader)
}

/// Reads a peak table (Neurosynth `database.txt` style) with at least
/// the columns `id`, `x`, `y` and `z`.
pub fn load_peaks<P: AsRef<Path>>(path: P) -> Result<Vec<Peak>> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let mut peaks = Vec::new();
    for row in reader.deserialize() {
        let peak: Peak = row?;
        peaks.push(peak);
    }
    info!("Loaded {} peaks from {}", peaks.len(), path.display());
    Ok(peaks)
}

/// Reads term-study associations. Accepts either a long table with `id` and
/// `term` columns or a wide tf-idf matrix (study id first, one column per term)
/// where every positive cell is an association.
pub fn load_term_associations<P: AsRef<Path>>(path: P) -> Result<Vec<TermAssociation>> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let headers = reader.headers()?.clone();

    let long_layout = headers.len() == 2
        && headers.iter().any(|h| h == "term")
        && headers.iter().any(|h| h == "id" || h == "pmid");

    let associations = if long_layout {
        read_long(&mut reader, &headers)?
    } else {
        read_wide(&mut reader, &headers)?
    };
    info!(
        "Loaded {} term associations from {} ({} layout)",
        associations.len(),
        path.display(),
        if long_layout { "long" } else { "wide" }
    );
    Ok(associations)
}

fn parse_study(field: &str, line: u64) -> Result<StudyId> {
    field
        .parse()
        .map_err(|_| Error::input(format!("line {}: '{}' is not a study id", line, field)))
}

fn read_long(reader: &mut csv::Reader<File>, headers: &StringRecord) -> Result<Vec<TermAssociation>> {
    let term_col = headers.iter().position(|h| h == "term").unwrap_or(1);
    let id_col = 1 - term_col;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let (Some(id), Some(term)) = (record.get(id_col), record.get(term_col)) else {
            return Err(Error::input(format!("line {}: expected an id and a term", line)));
        };
        if term.is_empty() {
            continue;
        }
        out.push(TermAssociation::new(parse_study(id, line)?, term));
    }
    Ok(out)
}

fn read_wide(reader: &mut csv::Reader<File>, headers: &StringRecord) -> Result<Vec<TermAssociation>> {
    if headers.len() < 2 {
        return Err(Error::input("term table needs a study id column and at least one term column"));
    }
    let terms: Vec<&str> = headers.iter().skip(1).collect();
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let study = match record.get(0) {
            Some(field) => parse_study(field, line)?,
            None => continue,
        };
        for (term, cell) in terms.iter().zip(record.iter().skip(1)) {
            match cell.parse::<f64>() {
                Ok(weight) if weight > 0.0 => out.push(TermAssociation::new(study, *term)),
                Ok(_) => {}
                Err(_) => skipped += 1,
            }
        }
    }
    if skipped > 0 {
        warn!("Ignored {} non-numeric cells in the term matrix", skipped);
    }
    Ok(out)
}
