//! Face alignment via 4-DOF similarity transform.
//!
//! Fits scale, rotation and translation that carry a canonical landmark set
//! (laid out on a `chip_size`² face chip) onto the landmarks observed in the
//! source image, then derives the chip rectangle and roll from that fit.
//! Three canonical presets are supported, see [`LandmarksAlignmentAlgorithm`].

use image::{Rgb, RgbImage};
use ndarray::{Array1, Array2};
use thiserror::Error;

use crate::config::{LandmarksAlignmentAlgorithm, ProcessConfiguration};
use crate::linalg::{self, LinalgError};
use crate::types::{FaceObservation, Point, LANDMARK_POINT_COUNT};

/// dlib 68-point mean face, points 17..=67, x coordinates in [0, 1].
const MEAN_FACE_X: [f64; 51] = [
    0.000213256, 0.0752622, 0.18113, 0.29077, 0.393397, 0.586856, 0.689483, 0.799124,
    0.904991, 0.98004, 0.490127, 0.490127, 0.490127, 0.490127, 0.36688, 0.426036,
    0.490127, 0.554217, 0.613373, 0.121737, 0.187122, 0.265825, 0.334606, 0.260918,
    0.182743, 0.645647, 0.714428, 0.793132, 0.858516, 0.79751, 0.719335, 0.254149,
    0.340985, 0.428858, 0.490127, 0.551395, 0.639268, 0.726104, 0.642159, 0.556721,
    0.490127, 0.423532, 0.338094, 0.290379, 0.428096, 0.490127, 0.552157, 0.689874,
    0.553364, 0.490127, 0.42689,
];

/// dlib 68-point mean face, points 17..=67, y coordinates in [0, 1].
const MEAN_FACE_Y: [f64; 51] = [
    0.106454, 0.038915, 0.0187482, 0.0344891, 0.0773906, 0.0773906, 0.0344891,
    0.0187482, 0.038915, 0.106454, 0.203352, 0.307009, 0.409805, 0.515625, 0.587326,
    0.609345, 0.628106, 0.609345, 0.587326, 0.216423, 0.178758, 0.179852, 0.231733,
    0.245099, 0.244077, 0.231733, 0.179852, 0.178758, 0.216423, 0.244077, 0.245099,
    0.780233, 0.745405, 0.727388, 0.742578, 0.727388, 0.745405, 0.780233, 0.864805,
    0.902192, 0.909281, 0.902192, 0.864805, 0.784792, 0.778746, 0.785343, 0.778746,
    0.784792, 0.824182, 0.831803, 0.824182,
];

/// dlib 5-point shape: outer/inner right eye, inner/outer left eye, nose tip.
const DLIB5: [(f64, f64); 5] = [
    (0.8595674595992, 0.2134981538014),
    (0.6460604764104, 0.2289674387677),
    (0.1205750620789, 0.2137274526848),
    (0.3340850613712, 0.2290642403242),
    (0.4901123135679, 0.6277975316475),
];

/// SphereFace 5-point shape: left eye, right eye, nose, left mouth, right mouth.
const SPHERE_FACE5: [(f64, f64); 5] = [
    (0.34191607142857144, 0.4615741071428571),
    (0.6565339285714286, 0.4598339285714285),
    (0.500225, 0.6405053571428571),
    (0.3709758928571429, 0.8246919642857142),
    (0.6315169642857142, 0.8232508928571428),
];

/// Constellation indexes matching each canonical point, in canonical order.
const DLIB32_LANDMARK_INDEXES: [usize; 29] = [
    46, 47, 48, 49, 54, 53, 52, 51, 50, 0, 4, 5, 1, 3, 2, 8, 12, 11, 7, 9, 10, 26, 29, 30, 31,
    34, 42, 40, 43,
];
const DLIB5_LANDMARK_INDEXES: [usize; 5] = [0, 1, 8, 7, 52];
const SPHERE_FACE5_LANDMARK_INDEXES: [usize; 5] = [6, 13, 52, 26, 35];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("need at least 2 point pairs, got {0}")]
    TooFewPoints(usize),
    #[error("point count mismatch: {reference} reference vs {observed} observed")]
    CountMismatch { reference: usize, observed: usize },
    #[error("expected a {expected}-point landmark constellation, found {found}")]
    MissingLandmarks { expected: usize, found: usize },
    #[error("chip padding {0} collapses the canonical shape")]
    DegeneratePadding(f64),
    #[error("degenerate landmarks: {0}")]
    Degenerate(#[from] LinalgError),
    #[error("observed landmarks collapse to a point (scale {0})")]
    Collapsed(f64),
}

/// Similarity transform `p ↦ [[a, -b], [b, a]]·p + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl SimilarityTransform {
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }

    /// Rotation angle in radians.
    pub fn roll(&self) -> f64 {
        self.b.atan2(self.a)
    }

    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }
}

/// Smallest usable observed/reference scale. Below this the chip samples a
/// single source pixel.
const MIN_TRANSFORM_SCALE: f64 = 1e-3;

/// Least-squares similarity transform carrying `reference` onto `observed`.
///
/// Each pair contributes two rows to the 2N×4 system
/// `[x, y, 1, 0]·t = X` and `[y, -x, 0, 1]·t = Y`, solved for
/// `t = [p, q, tx, ty]`. The rows encode `[[p, q], [-q, p]]`, so the
/// rotation-form parameters are `a = p`, `b = -q`.
///
/// Fails with [`AlignmentError::Collapsed`] when the observed points carry no
/// spread, since no chip can be cut from them.
pub fn solve_similarity_transform(
    reference: &[Point],
    observed: &[Point],
) -> Result<SimilarityTransform, AlignmentError> {
    if reference.len() != observed.len() {
        return Err(AlignmentError::CountMismatch {
            reference: reference.len(),
            observed: observed.len(),
        });
    }
    let n = reference.len();
    if n < 2 {
        return Err(AlignmentError::TooFewPoints(n));
    }

    let mut design = Array2::<f64>::zeros((2 * n, 4));
    let mut target = Array1::<f64>::zeros(2 * n);
    for (i, (r, o)) in reference.iter().zip(observed).enumerate() {
        let row = 2 * i;
        design[[row, 0]] = r.x;
        design[[row, 1]] = r.y;
        design[[row, 2]] = 1.0;
        design[[row + 1, 0]] = r.y;
        design[[row + 1, 1]] = -r.x;
        design[[row + 1, 3]] = 1.0;
        target[row] = o.x;
        target[row + 1] = o.y;
    }

    let t = linalg::solve_least_squares(&design, &target)?;
    let transform = SimilarityTransform {
        a: t[0],
        b: -t[1],
        tx: t[2],
        ty: t[3],
    };
    let scale = transform.scale();
    if !scale.is_finite() || scale < MIN_TRANSFORM_SCALE {
        return Err(AlignmentError::Collapsed(scale));
    }
    Ok(transform)
}

/// Axis-aligned rectangle with inclusive pixel bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rectangle {
    pub fn centered(center: Point, width: f64, height: f64) -> Self {
        Self {
            left: center.x - width / 2.0,
            top: center.y - height / 2.0,
            right: center.x + width / 2.0,
            bottom: center.y + height / 2.0,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left + 1.0
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top + 1.0
    }

    pub fn is_empty(&self) -> bool {
        self.top > self.bottom || self.left > self.right
    }
}

/// Where and how to cut a face chip out of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChipDetails {
    /// Chip footprint in source-image pixels.
    pub rect: Rectangle,
    pub roll: f64,
    pub scale: f64,
    pub rows: f64,
    pub cols: f64,
    /// Chip coordinates → source-image coordinates.
    pub transform: SimilarityTransform,
}

impl ChipDetails {
    pub fn new(
        reference: &[Point],
        observed: &[Point],
        chip_dims: (f64, f64),
    ) -> Result<Self, AlignmentError> {
        let transform = solve_similarity_transform(reference, observed)?;
        let (cols, rows) = chip_dims;
        let scale = transform.scale();
        let center = transform.apply(Point::new(cols / 2.0, rows / 2.0));
        Ok(Self {
            rect: Rectangle::centered(center, cols * scale, rows * scale),
            roll: transform.roll(),
            scale,
            rows,
            cols,
            transform,
        })
    }
}

/// Canonical landmark positions on a `size`² chip with the given padding.
pub fn canonical_points(
    algorithm: LandmarksAlignmentAlgorithm,
    size: f64,
    padding: f64,
) -> Result<Vec<Point>, AlignmentError> {
    let denom = 2.0 * padding + 1.0;
    if denom.abs() < f64::EPSILON {
        return Err(AlignmentError::DegeneratePadding(padding));
    }
    let place = |(x, y): (f64, f64)| Point::new((padding + x) / denom * size, (padding + y) / denom * size);

    let points = match algorithm {
        LandmarksAlignmentAlgorithm::Dlib32 => (17..=67usize)
            .filter(|i| {
                !((17..=26).contains(i)
                    || (55..=59).contains(i)
                    || (65..=67).contains(i)
                    || matches!(i, 49 | 53 | 60 | 64))
            })
            .map(|i| place((MEAN_FACE_X[i - 17], MEAN_FACE_Y[i - 17])))
            .collect(),
        LandmarksAlignmentAlgorithm::Dlib5 => [DLIB5[2], DLIB5[3], DLIB5[1], DLIB5[0], DLIB5[4]]
            .into_iter()
            .map(place)
            .collect(),
        LandmarksAlignmentAlgorithm::SphereFace5 => SPHERE_FACE5.into_iter().map(place).collect(),
    };
    Ok(points)
}

/// Constellation indexes the given preset reads, in canonical order.
pub fn landmark_indexes(algorithm: LandmarksAlignmentAlgorithm) -> &'static [usize] {
    match algorithm {
        LandmarksAlignmentAlgorithm::Dlib32 => &DLIB32_LANDMARK_INDEXES,
        LandmarksAlignmentAlgorithm::Dlib5 => &DLIB5_LANDMARK_INDEXES,
        LandmarksAlignmentAlgorithm::SphereFace5 => &SPHERE_FACE5_LANDMARK_INDEXES,
    }
}

/// Pick the preset's points out of a full landmark constellation.
pub fn observed_points(
    observation: &FaceObservation,
    algorithm: LandmarksAlignmentAlgorithm,
) -> Result<Vec<Point>, AlignmentError> {
    let landmarks = observation.landmarks.as_deref().unwrap_or(&[]);
    if landmarks.len() != LANDMARK_POINT_COUNT {
        return Err(AlignmentError::MissingLandmarks {
            expected: LANDMARK_POINT_COUNT,
            found: landmarks.len(),
        });
    }
    Ok(landmark_indexes(algorithm)
        .iter()
        .map(|&i| landmarks[i])
        .collect())
}

/// Chip details for one observed face under the given configuration.
pub fn face_chip_details(
    observation: &FaceObservation,
    config: &ProcessConfiguration,
) -> Result<ChipDetails, AlignmentError> {
    let algorithm = config.landmarks_alignment_algorithm;
    let size = config.face_chip_size() as f64;
    let observed = observed_points(observation, algorithm)?;
    let reference = canonical_points(algorithm, size, config.face_chip_padding)?;
    ChipDetails::new(&reference, &observed, (size, size))
}

/// Cut a `size`² chip out of `image` along `chip.transform`.
///
/// Uses bilinear interpolation. Source pixels outside the image read as black.
pub fn extract_chip(image: &RgbImage, chip: &ChipDetails, size: u32) -> RgbImage {
    let (src_w, src_h) = (image.width() as i64, image.height() as i64);
    // Output pixel (ox, oy) sits at chip coordinate (ox, oy) · (cols / size).
    let step_x = chip.cols / size as f64;
    let step_y = chip.rows / size as f64;

    let sample = |x: i64, y: i64| -> [f64; 3] {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            let p = image.get_pixel(x as u32, y as u32).0;
            [p[0] as f64, p[1] as f64, p[2] as f64]
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let src = chip
            .transform
            .apply(Point::new(ox as f64 * step_x, oy as f64 * step_y));

        let x0 = src.x.floor() as i64;
        let y0 = src.y.floor() as i64;
        let fx = src.x - x0 as f64;
        let fy = src.y - y0 as f64;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        let mut out = [0u8; 3];
        for c in 0..3 {
            let v = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}
