//! Uniform probabilistic choice over a finite set of studies.

use std::collections::HashSet;

use crate::corpus::StudyId;

/// Each member carries probability 1/N; anything else carries none.
/// Conditioning on an event is done by the caller as filter + renormalize.
#[derive(Debug, Clone)]
pub struct UniformChoice {
    members: HashSet<StudyId>,
    mass: f64,
}

impl UniformChoice {
    pub fn new<I: IntoIterator<Item = StudyId>>(ids: I) -> UniformChoice {
        let members: HashSet<StudyId> = ids.into_iter().collect();
        let mass = if members.is_empty() {
            0.0
        } else {
            1.0 / members.len() as f64
        };
        UniformChoice { members, mass }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: StudyId) -> bool {
        self.members.contains(&id)
    }

    pub fn mass(&self, id: StudyId) -> f64 {
        if self.members.contains(&id) {
            self.mass
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn masses_sum_to_one() {
        let choice = UniformChoice::new(vec![4, 8, 15, 16, 23, 42]);
        let total: f64 = [4, 8, 15, 16, 23, 42].iter().map(|id| choice.mass(*id)).sum();
        assert_relative_eq!(total, 1.0);
    }

    #[test]
    fn duplicates_count_once() {
        let choice = UniformChoice::new(vec![1, 1, 2]);
        assert_eq!(choice.len(), 2);
        assert_relative_eq!(choice.mass(1), 0.5);
    }

    #[test]
    fn non_members_have_no_mass() {
        let choice = UniformChoice::new(vec![1]);
        assert_eq!(choice.mass(2), 0.0);
        assert!(!choice.contains(2));
        assert!(UniformChoice::new(Vec::new()).is_empty());
    }
}
