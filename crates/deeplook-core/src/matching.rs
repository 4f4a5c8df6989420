//! Pairwise face verification between a source set and a target set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::linalg::LinalgError;
use crate::types::Face;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("no faces found in the source image")]
    NoSourceFaces,
    #[error("threshold must be finite and non-negative, got {0}")]
    InvalidThreshold(f64),
    #[error("distance between source {source_index} and target {target_index}: {error}")]
    Distance {
        source_index: usize,
        target_index: usize,
        #[source]
        error: LinalgError,
    },
}

/// A source/target pair whose encodings lie within `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub source_face: Face,
    pub target_face: Face,
    pub distance: f64,
    pub threshold: f64,
}

/// Every `(source, target)` pair with `distance ≤ threshold`, source-major.
///
/// An empty target list is not an error; it simply yields no matches.
pub fn verify(source: &[Face], target: &[Face], threshold: f64) -> Result<Vec<Match>, MatchError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(MatchError::InvalidThreshold(threshold));
    }
    if source.is_empty() {
        return Err(MatchError::NoSourceFaces);
    }

    let mut matches = Vec::new();
    for (si, s) in source.iter().enumerate() {
        for (ti, t) in target.iter().enumerate() {
            let distance = s.distance(t).map_err(|error| MatchError::Distance {
                source_index: si,
                target_index: ti,
                error,
            })?;
            if distance <= threshold {
                matches.push(Match {
                    source_face: s.clone(),
                    target_face: t.clone(),
                    distance,
                    threshold,
                });
            }
        }
    }
    tracing::debug!(
        source = source.len(),
        target = target.len(),
        matches = matches.len(),
        "verified faces"
    );
    Ok(matches)
}

/// Split into `(matching, rest)`, keeping relative order on both sides.
pub fn stable_partition<T>(items: Vec<T>, pred: impl Fn(&T) -> bool) -> (Vec<T>, Vec<T>) {
    items.into_iter().partition(|item| pred(item))
}

/// Split faces into `(source, target)` by their role identifier.
pub fn partition_by_role(faces: Vec<Face>) -> (Vec<Face>, Vec<Face>) {
    stable_partition(faces, Face::is_source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceObservation, SOURCE_IDENTIFIER, TARGET_IDENTIFIER};

    fn face(id: &str, encoding: &[f64]) -> Face {
        Face::new(id, FaceObservation::default()).with_encoding(encoding.to_vec())
    }

    #[test]
    fn test_verify_finds_pairs_within_threshold() {
        let source = vec![face("lhs", &[1.0, 0.0])];
        let target = vec![
            face("rhs", &[0.0, 1.0]),
            face("rhs", &[0.96, 0.28]),
            face("rhs", &[1.0, 0.0]),
        ];
        let matches = verify(&source, &target, 0.6).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].target_face.encoding, vec![0.96, 0.28]);
        assert_eq!(matches[1].distance, 0.0);
        for m in &matches {
            assert!(m.distance <= m.threshold);
            assert_eq!(m.distance, m.source_face.distance(&m.target_face).unwrap());
        }
    }

    #[test]
    fn test_verify_source_major_order() {
        let source = vec![face("lhs", &[1.0, 0.0]), face("lhs", &[0.0, 1.0])];
        let target = vec![face("t0", &[0.0, 1.0]), face("t1", &[1.0, 0.0])];
        let matches = verify(&source, &target, 2.0).unwrap();
        let order: Vec<(f64, &str)> = matches
            .iter()
            .map(|m| (m.source_face.encoding[0], m.target_face.local_identifier.as_str()))
            .collect();
        assert_eq!(order, vec![(1.0, "t0"), (1.0, "t1"), (0.0, "t0"), (0.0, "t1")]);
    }

    #[test]
    fn test_verify_is_deterministic() {
        let source = vec![face("lhs", &[0.6, 0.8]), face("lhs", &[0.8, 0.6])];
        let target = vec![face("rhs", &[0.7, 0.71]), face("rhs", &[1.0, 0.0])];
        assert_eq!(verify(&source, &target, 0.5), verify(&source, &target, 0.5));
    }

    #[test]
    fn test_verify_preconditions() {
        let target = vec![face("rhs", &[1.0])];
        assert_eq!(verify(&[], &target, 0.5), Err(MatchError::NoSourceFaces));
        let source = vec![face("lhs", &[1.0])];
        assert!(matches!(verify(&source, &target, f64::NAN), Err(MatchError::InvalidThreshold(_))));
        assert!(matches!(verify(&source, &target, -1.0), Err(MatchError::InvalidThreshold(_))));
        assert_eq!(verify(&source, &[], 0.5), Ok(vec![]));
    }

    #[test]
    fn test_verify_dimension_mismatch() {
        let source = vec![face("lhs", &[1.0, 0.0])];
        let target = vec![face("rhs", &[1.0])];
        assert_eq!(
            verify(&source, &target, 1.0),
            Err(MatchError::Distance {
                source_index: 0,
                target_index: 0,
                error: LinalgError::DimensionMismatch { left: 2, right: 1 },
            })
        );
    }

    #[test]
    fn test_stable_partition_preserves_order() {
        let (even, odd) = stable_partition(vec![5, 2, 8, 1, 4, 7], |n| n % 2 == 0);
        assert_eq!(even, vec![2, 8, 4]);
        assert_eq!(odd, vec![5, 1, 7]);
    }

    #[test]
    fn test_partition_by_role() {
        let faces = vec![
            face(TARGET_IDENTIFIER, &[1.0]),
            face(SOURCE_IDENTIFIER, &[2.0]),
            face(TARGET_IDENTIFIER, &[3.0]),
            face(SOURCE_IDENTIFIER, &[4.0]),
        ];
        let (source, target) = partition_by_role(faces);
        assert_eq!(source.iter().map(|f| f.encoding[0]).collect::<Vec<_>>(), vec![2.0, 4.0]);
        assert_eq!(target.iter().map(|f| f.encoding[0]).collect::<Vec<_>>(), vec![1.0, 3.0]);
    }
}
