//! Odds-ratio estimation: P(term | landed) / P(term | not landed) per fold.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use log::debug;
use rayon::prelude::*;

use crate::choice::UniformChoice;
use crate::corpus::{StudyId, TermAssociation};
use crate::error::Error;
use crate::folds::Fold;
use crate::proximity::Landed;

/// What to emit when the odds ratio of a (term, fold) has a zero denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedPolicy {
    /// Leave the row out.
    #[default]
    Omit,
    /// Keep the row with `bf = NaN`.
    Nan,
}

impl FromStr for UndefinedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "omit" | "skip" => Ok(UndefinedPolicy::Omit),
            "nan" => Ok(UndefinedPolicy::Nan),
            other => Err(Error::config(format!(
                "unknown undefined-ratio policy '{}', expected 'omit' or 'nan'",
                other
            ))),
        }
    }
}

impl fmt::Display for UndefinedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UndefinedPolicy::Omit => write!(f, "omit"),
            UndefinedPolicy::Nan => write!(f, "nan"),
        }
    }
}

/// Interned term-study associations: term names in ascending order and the
/// term indices each study reports.
#[derive(Debug, Clone, Default)]
pub struct TermTable {
    names: Vec<String>,
    by_study: HashMap<StudyId, Vec<usize>>,
}

impl TermTable {
    pub fn new(associations: &[TermAssociation]) -> TermTable {
        let names: Vec<String> = associations
            .iter()
            .map(|a| a.term.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut by_study: HashMap<StudyId, Vec<usize>> = HashMap::new();
        for a in associations {
            let terms = by_study.entry(a.study).or_default();
            let t = index[a.term.as_str()];
            if !terms.contains(&t) {
                terms.push(t);
            }
        }
        TermTable { names, by_study }
    }

    pub fn name(&self, term: usize) -> &str {
        &self.names[term]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    pub fn of_study(&self, study: StudyId) -> &[usize] {
        self.by_study.get(&study).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Probability mass of one fold split by landing, in total and per term.
#[derive(Debug, Clone, Default)]
pub struct FoldMasses {
    pub landed_total: f64,
    pub unlanded_total: f64,
    landed: HashMap<usize, f64>,
    unlanded: HashMap<usize, f64>,
}

impl FoldMasses {
    /// Accumulates the mass of the fold's studies under `docs`. A study with
    /// landed probability w puts w of its mass on the landed side and 1 - w
    /// on the other.
    pub fn accumulate(fold: &Fold, landed: &Landed, terms: &TermTable, docs: &UniformChoice) -> FoldMasses {
        let mut masses = FoldMasses::default();
        for &study in &fold.studies {
            let mass = docs.mass(study);
            if mass == 0.0 {
                continue;
            }
            let w = landed.get(&study).copied().unwrap_or(0.0);
            let inside = mass * w;
            let outside = mass * (1.0 - w);
            masses.landed_total += inside;
            masses.unlanded_total += outside;
            for &t in terms.of_study(study) {
                if inside > 0.0 {
                    *masses.landed.entry(t).or_insert(0.0) += inside;
                }
                if outside > 0.0 {
                    *masses.unlanded.entry(t).or_insert(0.0) += outside;
                }
            }
        }
        masses
    }

    //None when nothing in the fold landed
    pub fn given_landed(&self, term: usize) -> Option<f64> {
        conditional(self.landed.get(&term).copied().unwrap_or(0.0), self.landed_total)
    }

    pub fn absent_given_landed(&self, term: usize) -> Option<f64> {
        let present = self.landed.get(&term).copied().unwrap_or(0.0);
        conditional(self.landed_total - present, self.landed_total)
    }

    //None when everything in the fold landed
    pub fn given_not_landed(&self, term: usize) -> Option<f64> {
        conditional(self.unlanded.get(&term).copied().unwrap_or(0.0), self.unlanded_total)
    }

    pub fn absent_given_not_landed(&self, term: usize) -> Option<f64> {
        let present = self.unlanded.get(&term).copied().unwrap_or(0.0);
        conditional(self.unlanded_total - present, self.unlanded_total)
    }

    /// Terms with positive mass among landed studies, ascending by index.
    pub fn landed_terms(&self) -> Vec<usize> {
        let mut terms: Vec<usize> = self
            .landed
            .iter()
            .filter(|(_, m)| **m > 0.0)
            .map(|(t, _)| *t)
            .collect();
        terms.sort_unstable();
        terms
    }

    /// The odds ratio of `term`, or None when it is undefined.
    pub fn odds_ratio(&self, term: usize) -> Option<f64> {
        let p = self.given_landed(term)?;
        let pn = self.given_not_landed(term)?;
        if pn > 0.0 {
            Some(p / pn)
        } else {
            None
        }
    }
}

fn conditional(event: f64, given: f64) -> Option<f64> {
    if given > 0.0 {
        Some((event / given).clamp(0.0, 1.0))
    } else {
        None
    }
}

/// One odds ratio of a term in a fold.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsRow {
    pub term: String,
    pub fold: usize,
    pub bf: f64,
}

/// Odds ratios of every term reported by a landed study, for every fold.
/// Rows are ordered by term, then fold.
pub fn estimate(
    folds: &[Fold],
    landed: &Landed,
    terms: &TermTable,
    docs: &UniformChoice,
    policy: UndefinedPolicy,
) -> Vec<OddsRow> {
    let per_fold: Vec<Vec<(usize, usize, f64)>> = folds
        .par_iter()
        .map(|fold| {
            let masses = FoldMasses::accumulate(fold, landed, terms, docs);
            debug!(
                "Fold {}: landed mass {:.6}, not landed mass {:.6}",
                fold.index, masses.landed_total, masses.unlanded_total
            );
            masses
                .landed_terms()
                .into_iter()
                .filter_map(|t| match (masses.odds_ratio(t), policy) {
                    (Some(bf), _) => Some((t, fold.index, bf)),
                    (None, UndefinedPolicy::Nan) => Some((t, fold.index, f64::NAN)),
                    (None, UndefinedPolicy::Omit) => None,
                })
                .collect()
        })
        .collect();

    let mut rows: Vec<(usize, usize, f64)> = per_fold.into_iter().flatten().collect();
    rows.sort_by_key(|&(t, fold, _)| (t, fold));
    rows.into_iter()
        .map(|(t, fold, bf)| OddsRow {
            term: terms.name(t).to_string(),
            fold,
            bf,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assoc(pairs: &[(StudyId, &str)]) -> Vec<TermAssociation> {
        pairs.iter().map(|(s, t)| TermAssociation::new(*s, *t)).collect()
    }

    fn fold(index: usize, studies: &[StudyId]) -> Fold {
        Fold {
            index,
            studies: studies.to_vec(),
        }
    }

    #[test]
    fn deterministic_ratio_is_frequency_ratio() {
        //Studies 1-4, 1 and 2 landed. memory: 1, 3, 4. language: 2
        let terms = TermTable::new(&assoc(&[(1, "memory"), (2, "language"), (3, "memory"), (4, "memory")]));
        let docs = UniformChoice::new(vec![1, 2, 3, 4]);
        let landed: Landed = [(1, 1.0), (2, 1.0)].into_iter().collect();
        let masses = FoldMasses::accumulate(&fold(0, &[1, 2, 3, 4]), &landed, &terms, &docs);

        let memory = terms.index_of("memory").unwrap();
        assert_relative_eq!(masses.given_landed(memory).unwrap(), 0.5);
        assert_relative_eq!(masses.given_not_landed(memory).unwrap(), 1.0);
        assert_relative_eq!(masses.odds_ratio(memory).unwrap(), 0.5);

        //language is never reported outside the region
        let language = terms.index_of("language").unwrap();
        assert!(masses.odds_ratio(language).is_none());
    }

    #[test]
    fn presence_and_absence_sum_to_one() {
        let terms = TermTable::new(&assoc(&[(1, "a"), (2, "a"), (2, "b"), (5, "b")]));
        let docs = UniformChoice::new(1..=6);
        let landed: Landed = [(1, 1.0), (2, 0.3), (3, 0.9)].into_iter().collect();
        let masses = FoldMasses::accumulate(&fold(0, &[1, 2, 3, 4, 5, 6]), &landed, &terms, &docs);
        for t in 0..terms.len() {
            assert_relative_eq!(
                masses.given_landed(t).unwrap() + masses.absent_given_landed(t).unwrap(),
                1.0,
                epsilon = 1e-12
            );
            assert_relative_eq!(
                masses.given_not_landed(t).unwrap() + masses.absent_given_not_landed(t).unwrap(),
                1.0,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn swapping_presence_and_absence_swaps_roles() {
        //"a" reported by exactly the studies that do not report "not_a"
        let terms = TermTable::new(&assoc(&[(1, "a"), (3, "a"), (2, "not_a"), (4, "not_a"), (5, "not_a")]));
        let docs = UniformChoice::new(1..=5);
        let landed: Landed = [(1, 1.0), (2, 1.0)].into_iter().collect();
        let masses = FoldMasses::accumulate(&fold(0, &[1, 2, 3, 4, 5]), &landed, &terms, &docs);
        let a = terms.index_of("a").unwrap();
        let not_a = terms.index_of("not_a").unwrap();

        assert_relative_eq!(masses.given_landed(not_a).unwrap(), masses.absent_given_landed(a).unwrap());
        assert_relative_eq!(
            masses.given_not_landed(not_a).unwrap(),
            masses.absent_given_not_landed(a).unwrap()
        );
    }

    #[test]
    fn probabilistic_landing_weights_both_sides() {
        let terms = TermTable::new(&assoc(&[(1, "t"), (2, "u")]));
        let docs = UniformChoice::new(vec![1, 2]);
        let landed: Landed = [(1, 0.8), (2, 0.2)].into_iter().collect();
        let masses = FoldMasses::accumulate(&fold(0, &[1, 2]), &landed, &terms, &docs);
        let t = terms.index_of("t").unwrap();

        //landed side: 0.8 of study 1 out of 0.8 + 0.2
        assert_relative_eq!(masses.given_landed(t).unwrap(), 0.8);
        //not landed side: 0.2 of study 1 out of 0.2 + 0.8
        assert_relative_eq!(masses.given_not_landed(t).unwrap(), 0.2);
        assert_relative_eq!(masses.odds_ratio(t).unwrap(), 4.0);
    }

    #[test]
    fn studies_outside_the_universe_carry_no_mass() {
        let terms = TermTable::new(&assoc(&[(1, "t"), (9, "t")]));
        let docs = UniformChoice::new(vec![1, 2]);
        let landed: Landed = [(9, 1.0)].into_iter().collect();
        let masses = FoldMasses::accumulate(&fold(0, &[1, 2, 9]), &landed, &terms, &docs);
        assert_eq!(masses.landed_total, 0.0);
        assert!(masses.landed_terms().is_empty());
    }

    #[test]
    fn undefined_rows_follow_the_policy() {
        let terms = TermTable::new(&assoc(&[(1, "memory")]));
        let docs = UniformChoice::new(vec![1]);
        let landed: Landed = [(1, 1.0)].into_iter().collect();
        let folds = vec![fold(0, &[1])];

        assert!(estimate(&folds, &landed, &terms, &docs, UndefinedPolicy::Omit).is_empty());
        let rows = estimate(&folds, &landed, &terms, &docs, UndefinedPolicy::Nan);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].term, "memory");
        assert!(rows[0].bf.is_nan());
    }

    #[test]
    fn rows_are_ordered_by_term_then_fold() {
        let terms = TermTable::new(&assoc(&[(1, "b"), (1, "a"), (2, "a"), (2, "b")]));
        let docs = UniformChoice::new(vec![1, 2]);
        let landed: Landed = [(1, 1.0)].into_iter().collect();
        let folds = vec![fold(0, &[1, 2]), fold(1, &[1, 2])];
        let rows = estimate(&folds, &landed, &terms, &docs, UndefinedPolicy::Omit);

        let keys: Vec<(&str, usize)> = rows.iter().map(|r| (r.term.as_str(), r.fold)).collect();
        assert_eq!(keys, vec![("a", 0), ("a", 1), ("b", 0), ("b", 1)]);
        assert!(rows.iter().all(|r| r.bf == 1.0));
    }

    #[test]
    fn policy_parses_from_flags() {
        assert_eq!("omit".parse::<UndefinedPolicy>().unwrap(), UndefinedPolicy::Omit);
        assert_eq!("NaN".parse::<UndefinedPolicy>().unwrap(), UndefinedPolicy::Nan);
        assert!("zero".parse::<UndefinedPolicy>().is_err());
    }
}
