//! The analysis run: shared tuple sets built once, regions analysed in parallel.

use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::aggregate::{self, ResultRecord};
use crate::choice::UniformChoice;
use crate::config::Params;
use crate::coords::{CoordinateMapper, Voxel};
use crate::corpus::{self, Activation, Corpus};
use crate::error::{Error, Result};
use crate::folds::{self, Fold};
use crate::grid::{ReferenceGrid, Resampled};
use crate::nifti;
use crate::odds::{self, TermTable, UndefinedPolicy};
use crate::ontology::Ontology;
use crate::proximity::{self, Neighbourhood};
use crate::regions::{self, RegionLabel, RegionMap};

/// The read-only tuple sets every region is analysed against.
pub struct SharedInputs {
    pub activations: Vec<Activation>,
    pub terms: TermTable,
    pub docs: UniformChoice,
    pub folds: Vec<Fold>,
    pub ontology: Ontology,
    pub neighbourhood: Neighbourhood,
    pub policy: UndefinedPolicy,
}

impl SharedInputs {
    /// Builds the shared sets from a corpus already on the reference grid. With an
    /// ontology only associations of ontology terms are kept.
    pub fn build(
        corpus: Corpus,
        ontology: Option<Ontology>,
        n_folds: usize,
        frac_sample: f64,
        radius: f64,
        policy: UndefinedPolicy,
    ) -> Result<SharedInputs> {
        let universe = corpus.universe();
        let folds = folds::sample_folds(&universe, frac_sample, n_folds)?;
        let docs = UniformChoice::new(universe);

        let (terms, ontology) = match ontology {
            Some(ontology) => (TermTable::new(&ontology.filter_terms(&corpus.terms)), ontology),
            None => (TermTable::new(&corpus.terms), Ontology::default()),
        };
        info!(
            "Corpus: {} activations, {} studies, {} terms, {} folds",
            corpus.activations.len(),
            docs.len(),
            terms.len(),
            folds.len()
        );

        Ok(SharedInputs {
            activations: corpus.activations,
            terms,
            docs,
            folds,
            ontology,
            neighbourhood: Neighbourhood::new(radius),
            policy,
        })
    }
}

/// Results of one region.
#[derive(Debug, Clone)]
pub struct RegionResult {
    pub label: RegionLabel,
    pub landed: usize,
    pub records: Vec<ResultRecord>,
}

pub fn analyse_region(
    label: RegionLabel,
    voxels: &HashMap<Voxel, f64>,
    inputs: &SharedInputs,
) -> RegionResult {
    let landed = proximity::landed_studies(&inputs.activations, voxels, &inputs.neighbourhood);
    info!(
        "Region {}: {} voxels, {} studies landed ({} with certainty)",
        label,
        voxels.len(),
        landed.len(),
        proximity::certain(&landed).len()
    );

    let rows = odds::estimate(&inputs.folds, &landed, &inputs.terms, &inputs.docs, inputs.policy);
    let records = aggregate::join_concepts(&rows, &inputs.ontology);
    debug!("Region {}: {} odds rows, {} result records", label, rows.len(), records.len());

    RegionResult {
        label,
        landed: landed.len(),
        records,
    }
}

/// `<stem>.csv` for a single region, `<stem>_region<R>.csv` otherwise, with a
/// `_summary` suffix for the summary table.
pub fn output_path(stem: &str, region: Option<RegionLabel>, summary: bool) -> PathBuf {
    let mut name = stem.to_string();
    if let Some(label) = region {
        name.push_str(&format!("_region{}", label));
    }
    if summary {
        name.push_str("_summary");
    }
    name.push_str(".csv");
    PathBuf::from(name)
}

pub fn write_region(
    result: &RegionResult,
    stem: &str,
    several_regions: bool,
    with_summary: bool,
) -> Result<Vec<PathBuf>> {
    let region = if several_regions { Some(result.label) } else { None };
    let mut written = Vec::new();

    let path = output_path(stem, region, false);
    aggregate::write_results(&path, &result.records)?;
    written.push(path);

    if with_summary {
        let path = output_path(stem, region, true);
        aggregate::write_summary(&path, &aggregate::summarize(&result.records))?;
        written.push(path);
    }
    Ok(written)
}

/// Analyses every region of `regions` in parallel, then writes their tables in
/// label order. The first region that fails aborts the run before any later
/// region is written.
pub fn analyse_regions(
    regions: &RegionMap,
    inputs: &SharedInputs,
    stem: &str,
    with_summary: bool,
) -> Result<Vec<PathBuf>> {
    let several = regions.len() > 1;
    let work: Vec<(RegionLabel, &HashMap<Voxel, f64>)> = regions.iter().collect();

    let results: Vec<RegionResult> = work
        .par_iter()
        .map(|&(label, voxels)| analyse_region(label, voxels, inputs))
        .collect();

    let mut written = Vec::new();
    for result in &results {
        let files = write_region(result, stem, several, with_summary)
            .map_err(|e| Error::query(result.label, e))?;
        written.extend(files);
    }
    Ok(written)
}

fn log_parameters(params: &Params) {
    info!("Starting analysis with the following parameters:");
    info!("  brain_path = {}", params.brain_path.display());
    info!("  n_folds = {}", params.n_folds);
    info!("  resample = {}", params.resample);
    info!("  radius = {}", params.radius);
    info!("  tfIdf = {}", params.tf_idf);
    info!("  frac_sample = {}", params.frac_sample);
    info!("  output_file = {}", params.output_file);
    info!("  output_summary = {}", params.output_summary);
    info!("  mode = {}", params.mode);
    info!("  undefined = {}", params.undefined);
}

/// Runs the whole analysis described by `params`; returns the files written.
pub fn run(params: &Params) -> Result<Vec<PathBuf>> {
    params.validate()?;
    log_parameters(params);

    let base_grid = match &params.template {
        Some(path) => ReferenceGrid::from_volume(&nifti::read(path)?),
        None => ReferenceGrid::mni152_2009(),
    };
    let grid = base_grid.resampled(params.resample)?;

    let volume = nifti::read(&params.brain_path)?;
    let regions = regions::extract(&Resampled::new(&volume, &grid)?, params.mode)?;
    if regions.is_empty() {
        warn!("The map has no non-zero voxels on the reference grid, nothing to analyse");
        return Ok(Vec::new());
    }

    let peaks = corpus::load_peaks(&params.coordinates)?;
    let terms = corpus::load_term_associations(&params.features)?;
    let mapper = CoordinateMapper::new(&grid.affine)?;
    let corpus = Corpus::from_peaks(&peaks, terms, &mapper);
    let outside = corpus
        .activations
        .iter()
        .filter(|a| !grid.contains(&a.voxel))
        .count();
    if outside > 0 {
        debug!("{} peaks fall outside the reference grid", outside);
    }

    let ontology = match &params.ontology {
        Some(path) => Some(Ontology::load(path)?),
        None => None,
    };
    let inputs = SharedInputs::build(
        corpus,
        ontology,
        params.n_folds,
        params.frac_sample,
        params.radius,
        params.undefined,
    )?;

    if regions.len() > 1 {
        info!("Starting analysis for regions: {:?}", regions.labels());
    } else {
        info!("Starting analysis");
    }
    let written = analyse_regions(&regions, &inputs, &params.output_file, params.output_summary)?;
    info!("Results ready!");
    Ok(written)
}
