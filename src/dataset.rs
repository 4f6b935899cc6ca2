//! Dataset collaborator.
//!
//! A [`DesignDataset`] holds design values `x` and scalar measurements `y` in
//! contiguous row-major storage, together with the declared per-design shape
//! and encoding. It supplies the train/validation split consumed by
//! [`crate::FullyConnectedOracle::fit`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How design values are encoded.
pub enum Encoding {
    /// Real-valued feature vectors.
    Continuous,
    /// Sequences of class indices, optionally expanded into a trailing
    /// per-class logit axis.
    Categorical { num_classes: usize, is_logits: bool },
}

#[derive(Debug, Clone)]
pub struct DesignDataset {
    /// Row-major designs with shape `(len, input_shape...)`.
    x: Vec<f32>,
    /// One scalar measurement per design.
    y: Vec<f32>,
    input_shape: Vec<usize>,
    encoding: Encoding,
}

impl DesignDataset {
    /// Build a continuous dataset from flat row-major designs.
    pub fn continuous(x: Vec<f32>, y: Vec<f32>, input_shape: Vec<usize>) -> Result<Self> {
        Self::new(x, y, input_shape, Encoding::Continuous)
    }

    /// Build a categorical dataset.
    ///
    /// With `is_logits` the trailing axis of `input_shape` must equal
    /// `num_classes`; otherwise designs hold integral class indices in
    /// `[0, num_classes)`.
    pub fn categorical(
        x: Vec<f32>,
        y: Vec<f32>,
        input_shape: Vec<usize>,
        num_classes: usize,
        is_logits: bool,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::InvalidData("num_classes must be > 0".to_owned()));
        }
        if is_logits {
            if input_shape.len() < 2 || *input_shape.last().unwrap() != num_classes {
                return Err(Error::InvalidShape(format!(
                    "logit-encoded shape {input_shape:?} must end with the class axis {num_classes}"
                )));
            }
        } else if x
            .iter()
            .any(|&v| v < 0.0 || v >= num_classes as f32 || v.fract() != 0.0)
        {
            return Err(Error::InvalidData(format!(
                "class indices must be integral and in [0, {num_classes})"
            )));
        }
        Self::new(
            x,
            y,
            input_shape,
            Encoding::Categorical {
                num_classes,
                is_logits,
            },
        )
    }

    fn new(x: Vec<f32>, y: Vec<f32>, input_shape: Vec<usize>, encoding: Encoding) -> Result<Self> {
        if input_shape.is_empty() || input_shape.contains(&0) {
            return Err(Error::InvalidShape(format!(
                "input shape must be non-empty with positive dims, got {input_shape:?}"
            )));
        }
        if y.is_empty() {
            return Err(Error::InvalidData("dataset must not be empty".to_owned()));
        }
        let design_len: usize = input_shape.iter().product();
        if x.len() != y.len() * design_len {
            return Err(Error::InvalidShape(format!(
                "x length {} does not match len * design_len ({} * {design_len})",
                x.len(),
                y.len()
            )));
        }

        Ok(Self {
            x,
            y,
            input_shape,
            encoding,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.y.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Declared per-design shape (including a trailing class axis for
    /// logit-encoded designs).
    #[inline]
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Flattened per-design length.
    #[inline]
    pub fn design_len(&self) -> usize {
        self.input_shape.iter().product()
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[inline]
    pub fn x(&self) -> &[f32] {
        &self.x
    }

    #[inline]
    pub fn y(&self) -> &[f32] {
        &self.y
    }

    /// The `idx`-th design row. Panics if `idx >= len`.
    #[inline]
    pub fn design(&self, idx: usize) -> &[f32] {
        let d = self.design_len();
        &self.x[idx * d..(idx + 1) * d]
    }

    /// Split into disjoint training and validation subsets.
    ///
    /// Rows are shuffled with a seeded RNG; the validation side receives
    /// `round(len * val_fraction)` rows (at least one), and both sides must
    /// end up non-empty.
    pub fn split(&self, val_fraction: f32, seed: u64) -> Result<(Self, Self)> {
        if !(val_fraction > 0.0 && val_fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "val_fraction must be in (0, 1), got {val_fraction}"
            )));
        }

        let n = self.len();
        let n_val = ((n as f32 * val_fraction).round() as usize).max(1);
        if n_val >= n {
            return Err(Error::InvalidData(format!(
                "dataset of {n} rows is too small to hold out {n_val}"
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let (val_idx, train_idx) = order.split_at(n_val);
        Ok((self.take(train_idx), self.take(val_idx)))
    }

    fn take(&self, indices: &[usize]) -> Self {
        let d = self.design_len();
        let mut x = Vec::with_capacity(indices.len() * d);
        let mut y = Vec::with_capacity(indices.len());
        for &i in indices {
            x.extend_from_slice(self.design(i));
            y.push(self.y[i]);
        }
        Self {
            x,
            y,
            input_shape: self.input_shape.clone(),
            encoding: self.encoding,
        }
    }
}
