//! Vector primitives for embeddings and the small dense solver used by alignment.
//!
//! Every comparison between faces goes through [`distance`]. Inputs are checked:
//! empty or mismatched vectors are reported as errors instead of indexing past
//! the shorter slice.

use ndarray::{Array1, Array2};
use thiserror::Error;

/// Relative pivot tolerance for the normal-equation solve.
const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("vector is empty")]
    Empty,
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("vector has zero norm")]
    ZeroNorm,
    #[error("system is rank deficient; least squares solution is not unique")]
    RankDeficient,
}

fn check_pair(a: &[f64], b: &[f64]) -> Result<(), LinalgError> {
    if a.is_empty() || b.is_empty() {
        return Err(LinalgError::Empty);
    }
    if a.len() != b.len() {
        return Err(LinalgError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f64], b: &[f64]) -> Result<f64, LinalgError> {
    check_pair(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Euclidean (L2) norm.
pub fn magnitude(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Cosine similarity in [-1, 1]. Zero vectors are an error, not 0 or NaN.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, LinalgError> {
    let d = dot(a, b)?;
    let denom = magnitude(a) * magnitude(b);
    if denom == 0.0 {
        return Err(LinalgError::ZeroNorm);
    }
    Ok(d / denom)
}

/// Scale `v` to unit L2 norm.
pub fn normalize_l2(v: &[f64]) -> Result<Vec<f64>, LinalgError> {
    if v.is_empty() {
        return Err(LinalgError::Empty);
    }
    let norm = magnitude(v);
    if norm == 0.0 || !norm.is_finite() {
        return Err(LinalgError::ZeroNorm);
    }
    Ok(v.iter().map(|x| x / norm).collect())
}

/// Euclidean distance between two embeddings.
pub fn distance(a: &[f64], b: &[f64]) -> Result<f64, LinalgError> {
    check_pair(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt())
}

/// Component-wise mean of a set of equal-length vectors.
pub fn average_encoding(vectors: &[Vec<f64>]) -> Result<Vec<f64>, LinalgError> {
    let first = vectors.first().ok_or(LinalgError::Empty)?;
    let mut sum = vec![0.0; first.len()];
    for v in vectors {
        check_pair(first, v)?;
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f64;
    Ok(sum.into_iter().map(|x| x / n).collect())
}

/// Solve `A·x ≈ b` in the least-squares sense via the normal equations
/// `AᵀA·x = Aᵀb`.
///
/// `a` is rows × cols with rows ≥ cols. Fails with [`LinalgError::RankDeficient`]
/// when `AᵀA` is singular to working precision.
pub fn solve_least_squares(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinalgError> {
    let (rows, cols) = a.dim();
    if rows == 0 || cols == 0 {
        return Err(LinalgError::Empty);
    }
    if rows != b.len() {
        return Err(LinalgError::DimensionMismatch {
            left: rows,
            right: b.len(),
        });
    }
    if rows < cols {
        return Err(LinalgError::RankDeficient);
    }

    let ata = a.t().dot(a);
    let atb = a.t().dot(b);
    solve_square(ata, atb)
}

/// Gaussian elimination with partial pivoting on a square system.
fn solve_square(mut m: Array2<f64>, mut rhs: Array1<f64>) -> Result<Array1<f64>, LinalgError> {
    let n = rhs.len();
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return Err(LinalgError::RankDeficient);
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = m[[col, col]].abs();
        for row in (col + 1)..n {
            if m[[row, col]].abs() > max_val {
                max_val = m[[row, col]].abs();
                max_row = row;
            }
        }
        if max_val <= PIVOT_EPSILON * scale {
            return Err(LinalgError::RankDeficient);
        }
        if max_row != col {
            for j in 0..n {
                m.swap([col, j], [max_row, j]);
            }
            rhs.swap(col, max_row);
        }

        let pivot = m[[col, col]];
        for row in (col + 1)..n {
            let factor = m[[row, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                m[[row, j]] -= factor * m[[col, j]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut acc = rhs[i];
        for j in (i + 1)..n {
            acc -= m[[i, j]] * x[j];
        }
        x[i] = acc / m[[i, i]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize_l2(&[3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-12);
        assert!((v[1] - 0.8).abs() < 1e-12);
        assert!((magnitude(&v) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_idempotent() {
        let v = vec![0.3, -1.7, 2.2, 9.0, -0.01];
        let once = normalize_l2(&v).unwrap();
        let twice = normalize_l2(&once).unwrap();
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
    }

    #[test]
    fn test_normalize_zero_vector_is_error() {
        assert_eq!(normalize_l2(&[0.0, 0.0]), Err(LinalgError::ZeroNorm));
        assert_eq!(normalize_l2(&[]), Err(LinalgError::Empty));
    }

    #[test]
    fn test_distance_symmetric_and_identity() {
        let a = [0.1, 0.5, -0.3];
        let b = [0.4, -0.2, 0.9];
        assert_eq!(distance(&a, &b).unwrap(), distance(&b, &a).unwrap());
        assert_eq!(distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let d = distance(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        assert_eq!(
            distance(&[1.0, 2.0], &[1.0]),
            Err(LinalgError::DimensionMismatch { left: 2, right: 1 })
        );
        assert_eq!(distance(&[], &[]), Err(LinalgError::Empty));
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Err(LinalgError::ZeroNorm));
    }

    #[test]
    fn test_average_encoding() {
        let avg = average_encoding(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(avg, vec![2.0, 4.0]);
        assert_eq!(average_encoding(&[]), Err(LinalgError::Empty));
    }

    #[test]
    fn test_least_squares_exact_system() {
        // x + y = 3, x - y = 1, 2x + y = 5 → x = 2, y = 1
        let a = array![[1.0, 1.0], [1.0, -1.0], [2.0, 1.0]];
        let b = array![3.0, 1.0, 5.0];
        let x = solve_least_squares(&a, &b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-10);
        assert!((x[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_least_squares_overdetermined_fit() {
        // Fit y = m·t through (0,0), (1,1), (2,3): m = (0 + 1 + 6) / (0 + 1 + 4) = 1.4
        let a = array![[0.0], [1.0], [2.0]];
        let b = array![0.0, 1.0, 3.0];
        let x = solve_least_squares(&a, &b).unwrap();
        assert!((x[0] - 1.4).abs() < 1e-10);
    }

    #[test]
    fn test_least_squares_rank_deficient() {
        // Second column is a multiple of the first
        let a = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let b = array![1.0, 2.0, 3.0];
        assert_eq!(solve_least_squares(&a, &b), Err(LinalgError::RankDeficient));
    }
}
