//! Baseline triple solving.
//!
//! Given `ab = (A+B)/2`, `ac = (A+C)/2` and `bc = (B+C)/2` for one entity, the
//! unique solution is:
//!
//! ```text
//! rank_A = ab + ac - bc
//! rank_B = 2*ab - rank_A
//! rank_C = 2*ac - rank_A
//! ```
//!
//! Only entities present in all three pair results can be solved. All
//! arithmetic stays in `f64` with no intermediate rounding.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{EntityId, PairKey, Source, SourceId};

/// Three distinct sources; `a` becomes the fixed baseline for propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineTriple {
    pub a: Source,
    pub b: Source,
    pub c: Source,
}

impl BaselineTriple {
    pub fn new(a: Source, b: Source, c: Source) -> Self {
        Self { a, b, c }
    }

    /// The three pairs in query order: AB, AC, BC.
    pub fn pairs(&self) -> [(&Source, &Source); 3] {
        [(&self.a, &self.b), (&self.a, &self.c), (&self.b, &self.c)]
    }

    pub fn pair_keys(&self) -> [PairKey; 3] {
        self.pairs().map(|(x, y)| PairKey::new(&x.id(), &y.id()))
    }

    pub fn ids(&self) -> [SourceId; 3] {
        [self.a.id(), self.b.id(), self.c.id()]
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.ids().contains(id)
    }
}

impl std::fmt::Display for BaselineTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}]", self.a, self.b, self.c)
    }
}

/// Individual values for the three baseline sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSolution {
    pub triple: BaselineTriple,
    pub rank_a: BTreeMap<EntityId, f64>,
    pub rank_b: BTreeMap<EntityId, f64>,
    pub rank_c: BTreeMap<EntityId, f64>,
    /// Entities seen in one or two of the pair results but not all three.
    pub skipped: BTreeSet<EntityId>,
}

impl BaselineSolution {
    /// Number of entities solved (identical for all three sources).
    pub fn coverage(&self) -> usize {
        self.rank_a.len()
    }
}

/// Solve a single entity from its three pair averages.
pub fn solve_entity(ab: f64, ac: f64, bc: f64) -> (f64, f64, f64) {
    let rank_a = ab + ac - bc;
    let rank_b = 2.0 * ab - rank_a;
    let rank_c = 2.0 * ac - rank_a;
    (rank_a, rank_b, rank_c)
}

/// Closed-form solver for a baseline triple.
pub struct BaselineSolver;

impl BaselineSolver {
    /// Solve every entity present in all of `ab`, `ac`, `bc`.
    pub fn solve(
        triple: &BaselineTriple,
        ab: &BTreeMap<EntityId, f64>,
        ac: &BTreeMap<EntityId, f64>,
        bc: &BTreeMap<EntityId, f64>,
    ) -> BaselineSolution {
        let mut rank_a = BTreeMap::new();
        let mut rank_b = BTreeMap::new();
        let mut rank_c = BTreeMap::new();

        for (entity, &ab_avg) in ab {
            let (Some(&ac_avg), Some(&bc_avg)) = (ac.get(entity), bc.get(entity)) else {
                continue;
            };
            let (a, b, c) = solve_entity(ab_avg, ac_avg, bc_avg);
            rank_a.insert(entity.clone(), a);
            rank_b.insert(entity.clone(), b);
            rank_c.insert(entity.clone(), c);
        }

        let skipped: BTreeSet<EntityId> = ab
            .keys()
            .chain(ac.keys())
            .chain(bc.keys())
            .filter(|e| !rank_a.contains_key(*e))
            .cloned()
            .collect();

        tracing::debug!(
            triple = %triple,
            solved = rank_a.len(),
            skipped = skipped.len(),
            "baseline triple solved"
        );

        BaselineSolution {
            triple: triple.clone(),
            rank_a,
            rank_b,
            rank_c,
            skipped,
        }
    }
}

/// Ordered candidate triples for baseline establishment.
///
/// An explicit override comes first; after it, every 3-combination of the
/// selected sources in lexicographic catalog order (first three sources
/// first). A combination with the same members as the override is skipped.
pub struct TriplePlanner {
    sources: Vec<Source>,
    pending_override: Option<BaselineTriple>,
    emitted_override: Option<BaselineTriple>,
    next: Option<(usize, usize, usize)>,
}

impl TriplePlanner {
    pub fn new(sources: Vec<Source>, baseline_override: Option<BaselineTriple>) -> Self {
        let next = (sources.len() >= 3).then_some((0, 1, 2));
        Self {
            sources,
            pending_override: baseline_override,
            emitted_override: None,
            next,
        }
    }

    fn advance(&mut self, (i, j, k): (usize, usize, usize)) {
        let n = self.sources.len();
        self.next = if k + 1 < n {
            Some((i, j, k + 1))
        } else if j + 2 < n {
            Some((i, j + 1, j + 2))
        } else if i + 3 < n {
            Some((i + 1, i + 2, i + 3))
        } else {
            None
        };
    }

    fn same_members(x: &BaselineTriple, y: &BaselineTriple) -> bool {
        let mut xs = x.ids();
        let mut ys = y.ids();
        xs.sort();
        ys.sort();
        xs == ys
    }
}

impl Iterator for TriplePlanner {
    type Item = BaselineTriple;

    fn next(&mut self) -> Option<BaselineTriple> {
        if let Some(triple) = self.pending_override.take() {
            self.emitted_override = Some(triple.clone());
            return Some(triple);
        }
        loop {
            let (i, j, k) = self.next?;
            self.advance((i, j, k));
            let triple = BaselineTriple::new(
                self.sources[i].clone(),
                self.sources[j].clone(),
                self.sources[k].clone(),
            );
            let repeats_override = self
                .emitted_override
                .as_ref()
                .is_some_and(|o| Self::same_members(o, &triple));
            if !repeats_override {
                return Some(triple);
            }
        }
    }
}
