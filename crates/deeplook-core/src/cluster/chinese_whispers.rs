//! Chinese Whispers graph clustering.
//!
//! Builds an unweighted graph linking items within `epsilon`, gives every
//! node its own label and repeatedly lets each node adopt the label most
//! common among its neighbours. Visitation order is shuffled per pass from a
//! seeded RNG so a given seed always yields the same grouping.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{group_by_label, ClusterAlgorithm};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChineseWhispers {
    pub epsilon: f64,
    pub iterations: usize,
    pub seed: u64,
}

impl ChineseWhispers {
    pub fn new(epsilon: f64, iterations: usize, seed: u64) -> Self {
        Self {
            epsilon,
            iterations,
            seed,
        }
    }
}

/// Label with the most votes; ties go to the lowest label.
fn majority_label(neighbours: &[usize], labels: &[usize]) -> Option<usize> {
    let mut votes: BTreeMap<usize, usize> = BTreeMap::new();
    for &n in neighbours {
        *votes.entry(labels[n]).or_default() += 1;
    }
    let mut best: Option<(usize, usize)> = None;
    for (label, count) in votes {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

impl ClusterAlgorithm for ChineseWhispers {
    fn cluster(&self, len: usize, distance: &dyn Fn(usize, usize) -> f64) -> Vec<Vec<usize>> {
        let adjacency: Vec<Vec<usize>> = (0..len)
            .map(|i| {
                (0..len)
                    .filter(|&j| j != i && distance(i, j) <= self.epsilon)
                    .collect()
            })
            .collect();

        let mut labels: Vec<usize> = (0..len).collect();
        let mut order: Vec<usize> = (0..len).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for pass in 0..self.iterations {
            order.shuffle(&mut rng);
            let mut changed = false;
            for &node in &order {
                // Isolated nodes keep their own label.
                if let Some(label) = majority_label(&adjacency[node], &labels) {
                    if label != labels[node] {
                        labels[node] = label;
                        changed = true;
                    }
                }
            }
            if !changed {
                tracing::trace!(passes = pass + 1, "chinese whispers converged");
                break;
            }
        }

        group_by_label(&labels)
    }
}
