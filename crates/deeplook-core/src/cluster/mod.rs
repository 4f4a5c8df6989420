//! Face clustering over L2-normalised encodings.
//!
//! [`cluster`] computes the full pairwise distance matrix up front, so a face
//! with a missing or mismatched encoding fails the call before any grouping
//! happens. The algorithms themselves only see indexes and an injected
//! distance function.

pub mod chinese_whispers;
pub mod dbscan;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::linalg::LinalgError;
use crate::types::Face;

pub use chinese_whispers::ChineseWhispers;
pub use dbscan::Dbscan;

const DEFAULT_MINIMUM_CLUSTER_SIZE: usize = 1;
const DEFAULT_NUMBER_ITERATIONS: usize = 100;
const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("invalid cluster options: {0}")]
    InvalidOptions(String),
    #[error("distance between faces {left} and {right}: {source}")]
    Distance {
        left: usize,
        right: usize,
        #[source]
        source: LinalgError,
    },
    #[error("unknown cluster algorithm {0:?}")]
    UnknownAlgorithm(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    Dbscan,
    #[default]
    ChineseWhispers,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterType::Dbscan => f.write_str("dbscan"),
            ClusterType::ChineseWhispers => f.write_str("chinese_whispers"),
        }
    }
}

impl FromStr for ClusterType {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "dbscan" => Ok(Self::Dbscan),
            "chinese_whispers" | "chinesewhispers" => Ok(Self::ChineseWhispers),
            _ => Err(ClusterError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// How [`cluster`] groups faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// ChineseWhispers keeps only groups strictly larger than this.
    pub minimum_cluster_size: usize,
    /// Upper bound on ChineseWhispers label-propagation passes.
    pub number_iterations: usize,
    /// Maximum encoding distance for two faces to be neighbours.
    pub threshold: f64,
    pub cluster_type: ClusterType,
    /// Seed for the ChineseWhispers visitation order.
    pub seed: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            minimum_cluster_size: DEFAULT_MINIMUM_CLUSTER_SIZE,
            number_iterations: DEFAULT_NUMBER_ITERATIONS,
            threshold: DEFAULT_THRESHOLD,
            cluster_type: ClusterType::default(),
            seed: 0,
        }
    }
}

impl ClusterOptions {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.minimum_cluster_size < 1 {
            return Err(ClusterError::InvalidOptions(
                "minimum_cluster_size must be at least 1".into(),
            ));
        }
        if self.number_iterations == 0 {
            return Err(ClusterError::InvalidOptions(
                "number_iterations must be positive".into(),
            ));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ClusterError::InvalidOptions(format!(
                "threshold must be finite and non-negative, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// A clustering algorithm over `len` items addressed by index.
///
/// Returns index groups ordered by their first member.
pub trait ClusterAlgorithm {
    fn cluster(&self, len: usize, distance: &dyn Fn(usize, usize) -> f64) -> Vec<Vec<usize>>;
}

/// Symmetric matrix of encoding distances.
pub fn distance_matrix(faces: &[Face]) -> Result<Array2<f64>, ClusterError> {
    let n = faces.len();
    let mut matrix = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = faces[i]
                .distance(&faces[j])
                .map_err(|source| ClusterError::Distance {
                    left: i,
                    right: j,
                    source,
                })?;
            matrix[[i, j]] = d;
            matrix[[j, i]] = d;
        }
    }
    // A lone face still needs a usable encoding.
    if n == 1 && faces[0].encoding.is_empty() {
        return Err(ClusterError::Distance {
            left: 0,
            right: 0,
            source: LinalgError::Empty,
        });
    }
    Ok(matrix)
}

/// Group faces of the same person.
///
/// DBSCAN treats faces sharing a `local_identifier` as infinitely far apart
/// and returns a partition of the input. The exclusion only blocks direct
/// links: two faces from one asset still share a group when a third face
/// reaches both. ChineseWhispers drops groups of
/// `minimum_cluster_size` faces or fewer.
pub fn cluster(faces: &[Face], options: &ClusterOptions) -> Result<Vec<Vec<Face>>, ClusterError> {
    options.validate()?;
    if faces.is_empty() {
        return Ok(Vec::new());
    }

    let matrix = distance_matrix(faces)?;
    let groups = match options.cluster_type {
        ClusterType::Dbscan => {
            let distance = |i: usize, j: usize| {
                if i != j && faces[i].local_identifier == faces[j].local_identifier {
                    f64::INFINITY
                } else {
                    matrix[[i, j]]
                }
            };
            Dbscan::new(options.threshold, 1).cluster(faces.len(), &distance)
        }
        ClusterType::ChineseWhispers => {
            let algorithm = ChineseWhispers::new(
                options.threshold,
                options.number_iterations,
                options.seed,
            );
            algorithm
                .cluster(faces.len(), &|i, j| matrix[[i, j]])
                .into_iter()
                .filter(|g| g.len() > options.minimum_cluster_size)
                .collect()
        }
    };

    tracing::debug!(
        faces = faces.len(),
        groups = groups.len(),
        algorithm = %options.cluster_type,
        "clustered faces"
    );

    Ok(groups
        .into_iter()
        .map(|g| g.into_iter().map(|i| faces[i].clone()).collect())
        .collect())
}

/// Turn per-item labels into index groups ordered by first member.
pub(crate) fn group_by_label(labels: &[usize]) -> Vec<Vec<usize>> {
    let mut slots: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        let slot = *slots.entry(label).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceObservation;

    fn face(id: &str, encoding: &[f64]) -> Face {
        Face::new(id, FaceObservation::default()).with_encoding(encoding.to_vec())
    }

    /// Two people, three photos each, distinct assets.
    fn two_people() -> Vec<Face> {
        vec![
            face("a1", &[1.0, 0.0, 0.0]),
            face("b1", &[0.0, 1.0, 0.0]),
            face("a2", &[0.98, 0.1, 0.0]),
            face("a3", &[0.97, 0.0, 0.15]),
            face("b2", &[0.1, 0.99, 0.0]),
            face("b3", &[0.0, 0.97, 0.2]),
        ]
    }

    fn ids(groups: &[Vec<Face>]) -> Vec<Vec<&str>> {
        groups
            .iter()
            .map(|g| g.iter().map(|f| f.local_identifier.as_str()).collect())
            .collect()
    }

    fn assert_partition(groups: &[Vec<Face>], faces: &[Face]) {
        let mut seen: Vec<&str> = groups
            .iter()
            .flatten()
            .map(|f| f.local_identifier.as_str())
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<&str> = faces.iter().map(|f| f.local_identifier.as_str()).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected, "every face in exactly one group");
    }

    fn options(cluster_type: ClusterType) -> ClusterOptions {
        ClusterOptions {
            threshold: 0.5,
            cluster_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_dbscan_partitions_two_people() {
        let faces = two_people();
        let groups = cluster(&faces, &options(ClusterType::Dbscan)).unwrap();
        assert_eq!(ids(&groups), vec![vec!["a1", "a2", "a3"], vec!["b1", "b2", "b3"]]);
        assert_partition(&groups, &faces);
    }

    #[test]
    fn test_chinese_whispers_partitions_two_people() {
        let faces = two_people();
        let groups = cluster(&faces, &options(ClusterType::ChineseWhispers)).unwrap();
        assert_eq!(ids(&groups), vec![vec!["a1", "a2", "a3"], vec!["b1", "b2", "b3"]]);
        assert_partition(&groups, &faces);
    }

    #[test]
    fn test_dbscan_keeps_outliers_as_singletons() {
        let mut faces = two_people();
        faces.push(face("loner", &[0.0, 0.0, 1.0]));
        let groups = cluster(&faces, &options(ClusterType::Dbscan)).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(ids(&groups)[2], vec!["loner"]);
        assert_partition(&groups, &faces);
    }

    #[test]
    fn test_chinese_whispers_drops_small_groups() {
        let mut faces = two_people();
        faces.push(face("loner", &[0.0, 0.0, 1.0]));
        let groups = cluster(&faces, &options(ClusterType::ChineseWhispers)).unwrap();
        assert_eq!(groups.len(), 2);
        // Only the singleton loner is dropped.
        let kept: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(kept, faces.len() - 1);
        assert!(ids(&groups).iter().flatten().all(|id| *id != "loner"));

        let strict = ClusterOptions {
            minimum_cluster_size: 3,
            ..options(ClusterType::ChineseWhispers)
        };
        assert!(cluster(&faces, &strict).unwrap().is_empty());
    }

    #[test]
    fn test_dbscan_links_same_asset_faces_through_a_third() {
        let faces = vec![
            face("img1", &[1.0, 0.0]),
            face("img2", &[1.0, 0.05]),
            face("img1", &[1.0, 0.1]),
        ];
        let groups = cluster(&faces, &options(ClusterType::Dbscan)).unwrap();
        assert_eq!(ids(&groups), vec![vec!["img1", "img2", "img1"]]);
    }

    #[test]
    fn test_dbscan_separates_faces_from_same_asset() {
        // Identical encodings, but both faces come from one photo
        let faces = vec![face("group-photo", &[1.0, 0.0]), face("group-photo", &[1.0, 0.0])];
        let groups = cluster(&faces, &options(ClusterType::Dbscan)).unwrap();
        assert_eq!(groups.len(), 2);
        for g in &groups {
            assert_eq!(g.len(), 1);
        }
    }

    #[test]
    fn test_chinese_whispers_is_seed_deterministic() {
        let faces = two_people();
        let opts = ClusterOptions {
            seed: 42,
            ..options(ClusterType::ChineseWhispers)
        };
        let first = cluster(&faces, &opts).unwrap();
        let second = cluster(&faces, &opts).unwrap();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster(&[], &ClusterOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let faces = vec![face("a", &[1.0, 0.0]), face("b", &[1.0, 0.0, 0.0])];
        let err = cluster(&faces, &options(ClusterType::Dbscan)).unwrap_err();
        assert_eq!(
            err,
            ClusterError::Distance {
                left: 0,
                right: 1,
                source: LinalgError::DimensionMismatch { left: 2, right: 3 },
            }
        );
    }

    #[test]
    fn test_single_face_without_encoding_is_error() {
        let faces = vec![face("a", &[])];
        assert!(matches!(
            cluster(&faces, &options(ClusterType::Dbscan)),
            Err(ClusterError::Distance { .. })
        ));
    }

    #[test]
    fn test_invalid_options() {
        let faces = two_people();
        for bad in [
            ClusterOptions { minimum_cluster_size: 0, ..Default::default() },
            ClusterOptions { number_iterations: 0, ..Default::default() },
            ClusterOptions { threshold: f64::NAN, ..Default::default() },
            ClusterOptions { threshold: -0.1, ..Default::default() },
        ] {
            assert!(matches!(cluster(&faces, &bad), Err(ClusterError::InvalidOptions(_))));
        }
    }

    #[test]
    fn test_options_from_json() {
        let opts: ClusterOptions =
            serde_json::from_str(r#"{"threshold": 0.6, "cluster_type": "dbscan"}"#).unwrap();
        assert_eq!(opts.cluster_type, ClusterType::Dbscan);
        assert_eq!(opts.threshold, 0.6);
        assert_eq!(opts.number_iterations, 100);
        assert_eq!("Chinese-Whispers".parse::<ClusterType>().unwrap(), ClusterType::ChineseWhispers);
    }

    #[test]
    fn test_group_by_label_orders_by_first_member() {
        assert_eq!(
            group_by_label(&[7, 3, 7, 3, 9]),
            vec![vec![0, 2], vec![1, 3], vec![4]]
        );
    }
}
