//! Repeated random sub-sampling of the study universe.

use log::debug;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::corpus::StudyId;
use crate::error::{Error, Result};

/// The studies drawn for one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub index: usize,
    pub studies: Vec<StudyId>,
}

/// Number of studies per fold: round(fraction * N), halves to even.
pub fn sample_size(n_studies: usize, fraction: f64) -> usize {
    ((fraction * n_studies as f64).round_ties_even() as usize).min(n_studies)
}

pub fn draw_fold(universe: &[StudyId], fraction: f64, index: usize) -> Fold {
    let mut rng = ChaCha8Rng::seed_from_u64(index as u64);
    let mut studies: Vec<StudyId> = universe
        .choose_multiple(&mut rng, sample_size(universe.len(), fraction))
        .copied()
        .collect();
    studies.sort_unstable();
    Fold { index, studies }
}

/// Draws `n_folds` folds. Folds may overlap and need not cover the universe.
pub fn sample_folds(universe: &[StudyId], fraction: f64, n_folds: usize) -> Result<Vec<Fold>> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(Error::config(format!(
            "frac_sample must be in (0, 1], got {}",
            fraction
        )));
    }
    let folds: Vec<Fold> = (0..n_folds)
        .map(|index| draw_fold(universe, fraction, index))
        .collect();
    debug!(
        "Sampled {} folds of {} studies out of {}",
        folds.len(),
        sample_size(universe.len(), fraction),
        universe.len()
    );
    Ok(folds)
}
