//! Deterministic injective assignment of resources to requesters.
//!
//! Given N requesters, each with an ordered candidate list of resource
//! indices, `solve` returns one distinct index per requester.
//!
//! Tie-break rule: the assignment returned is the one a depth-first search
//! would find when visiting requesters in input order and each requester's
//! candidates in listed order. That is the lexicographically first complete
//! assignment by candidate position. It is reproducible for identical inputs
//! and carries no other optimality guarantee.
//!
//! Instead of a permutation search, the solver decides feasibility with
//! augmenting-path bipartite matching and then fixes requesters one at a time,
//! keeping the first candidate that still leaves the rest completable. This
//! gives the same answer in polynomial time.

use std::collections::{HashMap, HashSet};

/// Why a requester could not be assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsolvable {
    /// The requester's candidate list is empty
    NoCandidates,
    /// Every candidate is needed by earlier requesters
    Exhausted,
}

/// No injective assignment exists.
///
/// `requester` is the first requester (in input order) whose addition makes
/// the problem unsolvable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotSolvable {
    #[error("requester {requester} has no candidates")]
    NoCandidates { requester: usize },

    #[error("requester {requester} cannot be assigned: all of its {candidates} candidates are taken by earlier requesters")]
    Exhausted { requester: usize, candidates: usize },
}

impl NotSolvable {
    /// Index of the first unresolvable requester
    pub fn requester(&self) -> usize {
        match self {
            NotSolvable::NoCandidates { requester } | NotSolvable::Exhausted { requester, .. } => {
                *requester
            }
        }
    }

    /// Reason the requester could not be placed
    pub fn reason(&self) -> Unsolvable {
        match self {
            NotSolvable::NoCandidates { .. } => Unsolvable::NoCandidates,
            NotSolvable::Exhausted { .. } => Unsolvable::Exhausted,
        }
    }
}

/// Assign a distinct candidate to every requester.
pub fn solve(candidates: &[Vec<usize>]) -> Result<Vec<usize>, NotSolvable> {
    if let Some(requester) = candidates.iter().position(|c| c.is_empty()) {
        return Err(NotSolvable::NoCandidates { requester });
    }

    // Feasibility, reporting the first requester that cannot be added.
    let mut matcher = Matcher::new(candidates);
    for requester in 0..candidates.len() {
        if !matcher.add(requester, &HashSet::new()) {
            return Err(NotSolvable::Exhausted {
                requester,
                candidates: candidates[requester].len(),
            });
        }
    }

    // Fix requesters in order on their first candidate that keeps the
    // remainder solvable.
    let mut taken: HashSet<usize> = HashSet::new();
    let mut assignment = Vec::with_capacity(candidates.len());
    for (requester, options) in candidates.iter().enumerate() {
        let mut tried: HashSet<usize> = HashSet::new();
        let mut chosen = None;
        for &candidate in options {
            if taken.contains(&candidate) || !tried.insert(candidate) {
                continue;
            }
            taken.insert(candidate);
            if remainder_solvable(candidates, requester + 1, &taken) {
                chosen = Some(candidate);
                break;
            }
            taken.remove(&candidate);
        }

        match chosen {
            Some(candidate) => assignment.push(candidate),
            // Unreachable once feasibility holds; report rather than panic.
            None => {
                return Err(NotSolvable::Exhausted {
                    requester,
                    candidates: options.len(),
                })
            }
        }
    }

    Ok(assignment)
}

fn remainder_solvable(candidates: &[Vec<usize>], start: usize, blocked: &HashSet<usize>) -> bool {
    let mut matcher = Matcher::new(candidates);
    (start..candidates.len()).all(|requester| matcher.add(requester, blocked))
}

/// Augmenting-path bipartite matcher
struct Matcher<'a> {
    candidates: &'a [Vec<usize>],
    /// resource index -> requester currently holding it
    holder: HashMap<usize, usize>,
}

impl<'a> Matcher<'a> {
    fn new(candidates: &'a [Vec<usize>]) -> Self {
        Self {
            candidates,
            holder: HashMap::new(),
        }
    }

    fn add(&mut self, requester: usize, blocked: &HashSet<usize>) -> bool {
        let mut visited = HashSet::new();
        self.augment(requester, blocked, &mut visited)
    }

    fn augment(&mut self, requester: usize, blocked: &HashSet<usize>, visited: &mut HashSet<usize>) -> bool {
        let candidates = self.candidates;
        for &resource in &candidates[requester] {
            if blocked.contains(&resource) || !visited.insert(resource) {
                continue;
            }
            let free = match self.holder.get(&resource).copied() {
                None => true,
                Some(other) => self.augment(other, blocked, visited),
            };
            if free {
                self.holder.insert(resource, requester);
                return true;
            }
        }
        false
    }
}
