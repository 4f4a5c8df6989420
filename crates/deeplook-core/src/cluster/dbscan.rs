//! Density-based clustering (DBSCAN).

use super::{group_by_label, ClusterAlgorithm};

/// Points within `epsilon` of each other are neighbours; a point with at
/// least `min_points` neighbours (itself included) is a core point.
///
/// Points reachable from no core point are noise and come back as
/// singleton groups, so the result always covers every input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub epsilon: f64,
    pub min_points: usize,
}

impl Dbscan {
    pub fn new(epsilon: f64, min_points: usize) -> Self {
        Self {
            epsilon,
            min_points,
        }
    }

    fn neighbours(
        &self,
        len: usize,
        idx: usize,
        distance: &dyn Fn(usize, usize) -> f64,
    ) -> Vec<usize> {
        (0..len)
            .filter(|&j| j != idx && distance(idx, j) <= self.epsilon)
            .collect()
    }
}

impl ClusterAlgorithm for Dbscan {
    fn cluster(&self, len: usize, distance: &dyn Fn(usize, usize) -> f64) -> Vec<Vec<usize>> {
        let mut labels: Vec<Option<usize>> = vec![None; len];
        let mut visited = vec![false; len];
        let mut next_label = 0;

        for i in 0..len {
            if visited[i] {
                continue;
            }
            visited[i] = true;
            let mut frontier = self.neighbours(len, i, distance);
            if frontier.len() + 1 < self.min_points {
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels[i] = Some(label);

            let mut k = 0;
            while k < frontier.len() {
                let j = frontier[k];
                k += 1;
                if !visited[j] {
                    visited[j] = true;
                    let reach = self.neighbours(len, j, distance);
                    if reach.len() + 1 >= self.min_points {
                        frontier.extend(reach.into_iter().filter(|n| labels[*n].is_none()));
                    }
                }
                // Border points keep the first cluster that reaches them.
                if labels[j].is_none() {
                    labels[j] = Some(label);
                }
            }
        }

        // Noise gets a label of its own.
        let labels: Vec<usize> = labels
            .into_iter()
            .map(|l| {
                l.unwrap_or_else(|| {
                    next_label += 1;
                    next_label - 1
                })
            })
            .collect();
        group_by_label(&labels)
    }
}
