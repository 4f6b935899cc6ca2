//! Dense (affine) layers.
//!
//! A `Dense` layer computes `z = W x + b` with no activation; the hidden
//! blocks apply layer normalization and a nonlinearity on top of it, and the
//! output head uses the raw affine value as the scalar prediction.

use rand::Rng;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Weight initialization scheme.
pub enum Init {
    /// Xavier/Glorot uniform; suited to linear and tanh units.
    Xavier,
    /// He/Kaiming uniform; suited to rectified units.
    He,
}

#[derive(Debug, Clone)]
pub struct Dense {
    in_dim: usize,
    out_dim: usize,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl Dense {
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "dense dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let bound = match init {
            Init::Xavier => (6.0 / (in_dim + out_dim) as f32).sqrt(),
            Init::He => (6.0 / in_dim as f32).sqrt(),
        };

        let mut weights = vec![0.0; in_dim * out_dim];
        for w in weights.iter_mut() {
            *w = rng.gen_range(-bound..bound);
        }

        Ok(Self {
            in_dim,
            out_dim,
            weights,
            biases: vec![0.0; out_dim],
        })
    }

    /// Rebuild a layer from serialized parts, validating shapes and values.
    pub fn from_parts(
        in_dim: usize,
        out_dim: usize,
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidData(format!(
                "dense dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        let expected_w = in_dim
            .checked_mul(out_dim)
            .ok_or_else(|| Error::InvalidData("dense weight shape overflow".to_owned()))?;
        if weights.len() != expected_w {
            return Err(Error::InvalidData(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if biases.len() != out_dim {
            return Err(Error::InvalidData(format!(
                "biases length {} does not match out_dim {out_dim}",
                biases.len()
            )));
        }
        if weights.iter().any(|v| !v.is_finite()) || biases.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "dense parameters must contain only finite values".to_owned(),
            ));
        }

        Ok(Self {
            in_dim,
            out_dim,
            weights,
            biases,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    #[inline]
    pub(crate) fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    #[inline]
    pub(crate) fn biases_mut(&mut self) -> &mut [f32] {
        &mut self.biases
    }

    /// Forward pass for a single sample: `outputs = W * inputs + b`.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `outputs.len() == self.out_dim`
    #[inline]
    pub fn forward(&self, inputs: &[f32], outputs: &mut [f32]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        for o in 0..self.out_dim {
            let mut sum = self.biases[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                sum = self.weights[row + i].mul_add(inputs[i], sum);
            }
            outputs[o] = sum;
        }
    }

    /// Backward pass for a single sample.
    ///
    /// Semantics:
    /// - `d_weights` / `d_biases` are *accumulated into* (the batch loop zeroes
    ///   them once per batch)
    /// - `d_inputs`, when present, is overwritten
    ///
    /// Shape contract mirrors `forward`; `d_outputs` is `dL/d(outputs)`.
    #[inline]
    pub fn backward(
        &self,
        inputs: &[f32],
        d_outputs: &[f32],
        mut d_inputs: Option<&mut [f32]>,
        d_weights: &mut [f32],
        d_biases: &mut [f32],
    ) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(d_outputs.len(), self.out_dim);
        debug_assert_eq!(d_weights.len(), self.weights.len());
        debug_assert_eq!(d_biases.len(), self.out_dim);

        if let Some(d_in) = d_inputs.as_deref_mut() {
            debug_assert_eq!(d_in.len(), self.in_dim);
            d_in.fill(0.0);
        }

        for o in 0..self.out_dim {
            let d_z = d_outputs[o];
            d_biases[o] += d_z;

            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                d_weights[row + i] = d_z.mul_add(inputs[i], d_weights[row + i]);
            }
            if let Some(d_in) = d_inputs.as_deref_mut() {
                for i in 0..self.in_dim {
                    d_in[i] = self.weights[row + i].mul_add(d_z, d_in[i]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn from_parts_validates_shapes_and_values() {
        assert!(Dense::from_parts(2, 1, vec![1.0, 2.0], vec![0.0]).is_ok());
        assert!(Dense::from_parts(2, 1, vec![1.0], vec![0.0]).is_err());
        assert!(Dense::from_parts(2, 1, vec![1.0, 2.0], vec![]).is_err());
        assert!(Dense::from_parts(2, 1, vec![f32::NAN, 2.0], vec![0.0]).is_err());
        assert!(Dense::from_parts(0, 1, vec![], vec![0.0]).is_err());
    }

    #[test]
    fn forward_is_affine() {
        let layer = Dense::from_parts(2, 1, vec![2.0, -1.0], vec![0.5]).unwrap();
        let mut out = [0.0_f32];
        layer.forward(&[3.0, 4.0], &mut out);
        assert!((out[0] - (2.0 * 3.0 - 4.0 + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn backward_accumulates_parameter_gradients() {
        let layer = Dense::from_parts(2, 1, vec![2.0, -1.0], vec![0.5]).unwrap();
        let mut d_w = vec![0.0_f32; 2];
        let mut d_b = vec![0.0_f32; 1];
        let mut d_in = vec![0.0_f32; 2];

        layer.backward(&[3.0, 4.0], &[1.0], Some(&mut d_in), &mut d_w, &mut d_b);
        layer.backward(&[3.0, 4.0], &[1.0], Some(&mut d_in), &mut d_w, &mut d_b);

        // Two identical passes accumulate weight/bias grads, d_inputs is overwritten.
        assert_eq!(d_w, vec![6.0, 8.0]);
        assert_eq!(d_b, vec![2.0]);
        assert_eq!(d_in, vec![2.0, -1.0]);
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = Dense::new_with_rng(4, 3, Init::He, &mut rng_a).unwrap();
        let b = Dense::new_with_rng(4, 3, Init::He, &mut rng_b).unwrap();
        assert_eq!(a.weights(), b.weights());
    }
}
