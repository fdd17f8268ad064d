//! Training data and domain sampling for the curve-fitting demo.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::MlpError;
use crate::mlp::MLP;

/// Upper end of the raw input domain `[0, DOMAIN_MAX]`.
pub const DOMAIN_MAX: f64 = 100.0;

/// Inputs as rows of `xs`, one scalar target per row in `ys`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    xs: Array2<f64>,
    ys: Array1<f64>,
}

impl Dataset {
    pub fn new(xs: Array2<f64>, ys: Array1<f64>) -> Result<Self, MlpError> {
        if xs.nrows() != ys.len() {
            return Err(MlpError::shape(xs.nrows(), ys.len(), "dataset targets"));
        }
        Ok(Self { xs, ys })
    }

    pub fn from_rows(rows: &[Vec<f64>], ys: &[f64]) -> Result<Self, MlpError> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|r| r.len() != width) {
            return Err(MlpError::shape(width, row.len(), "dataset row"));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let actual = flat.len();
        let xs = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|_| MlpError::shape(rows.len() * width, actual, "dataset rows"))?;
        Self::new(xs, Array1::from_vec(ys.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.ys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    pub fn width(&self) -> usize {
        self.xs.ncols()
    }

    pub fn xs(&self) -> ArrayView2<'_, f64> {
        self.xs.view()
    }

    pub fn ys(&self) -> ArrayView1<'_, f64> {
        self.ys.view()
    }

    /// Row indices split into batches of `batch_size`; the last batch may be short.
    pub fn batches<R: Rng>(
        &self,
        batch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            indices.shuffle(rng);
        }
        indices
            .chunks(batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect()
    }

    pub fn select(&self, indices: &[usize]) -> (Array2<f64>, Array1<f64>) {
        (
            self.xs.select(Axis(0), indices),
            self.ys.select(Axis(0), indices),
        )
    }
}

/// Inverted-U target over the domain: rises, peaks before the midpoint, then
/// falls back. Values stay within `[0, 1]`.
pub fn true_function(x: f64) -> f64 {
    let t = (x / DOMAIN_MAX).clamp(0.0, 1.0);
    (PI * t).sin() * (1.0 - 0.4 * t)
}

/// `[t, t^2, ..., t^width]` with `t = x / DOMAIN_MAX`.
pub fn features(x: f64, width: usize) -> Vec<f64> {
    let t = x / DOMAIN_MAX;
    (1..=width).map(|k| t.powi(k as i32)).collect()
}

/// Draws `n` domain points uniformly, expands them with [`features`] and
/// labels them with [`true_function`] plus uniform noise in `[-noise, noise]`.
pub fn generate<R: Rng>(n: usize, width: usize, noise: f64, rng: &mut R) -> Dataset {
    let points: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..=DOMAIN_MAX)).collect();
    let xs = Array2::from_shape_fn((n, width), |(i, k)| {
        (points[i] / DOMAIN_MAX).powi(k as i32 + 1)
    });
    let ys = points
        .iter()
        .map(|&x| {
            let jitter = if noise > 0.0 {
                rng.gen_range(-noise..=noise)
            } else {
                0.0
            };
            true_function(x) + jitter
        })
        .collect::<Array1<f64>>();

    Dataset { xs, ys }
}

/// Evaluates the network's first output at `points` evenly spaced domain values.
pub fn sample_curve(mlp: &mut MLP, points: usize) -> Result<Vec<(f64, f64)>, MlpError> {
    let step = if points > 1 {
        DOMAIN_MAX / (points - 1) as f64
    } else {
        0.0
    };
    (0..points)
        .map(|i| {
            let x = i as f64 * step;
            let out = mlp.evaluate(&features(x, mlp.input_size()))?;
            Ok((x, out.first().copied().unwrap_or(f64::NAN)))
        })
        .collect()
}
