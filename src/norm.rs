//! Layer normalization.
//!
//! Each hidden block normalizes the affine output across its features before
//! the nonlinearity: `y = gain * (x - mean) / sqrt(var + EPS) + bias`.
//!
//! The forward pass caches the normalized values `x_hat` and the inverse
//! standard deviation so the backward pass needs no extra buffers.

use crate::{Error, Result};

pub(crate) const EPS: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct LayerNorm {
    dim: usize,
    gain: Vec<f32>,
    bias: Vec<f32>,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("layer norm dim must be > 0".to_owned()));
        }
        Ok(Self {
            dim,
            gain: vec![1.0; dim],
            bias: vec![0.0; dim],
        })
    }

    /// Rebuild from serialized parts, validating shapes and values.
    pub fn from_parts(dim: usize, gain: Vec<f32>, bias: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidData("layer norm dim must be > 0".to_owned()));
        }
        if gain.len() != dim || bias.len() != dim {
            return Err(Error::InvalidData(format!(
                "layer norm gain/bias lengths {}/{} do not match dim {dim}",
                gain.len(),
                bias.len()
            )));
        }
        if gain.iter().any(|v| !v.is_finite()) || bias.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "layer norm parameters must contain only finite values".to_owned(),
            ));
        }
        Ok(Self { dim, gain, bias })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn gain(&self) -> &[f32] {
        &self.gain
    }

    #[inline]
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    #[inline]
    pub(crate) fn gain_mut(&mut self) -> &mut [f32] {
        &mut self.gain
    }

    #[inline]
    pub(crate) fn bias_mut(&mut self) -> &mut [f32] {
        &mut self.bias
    }

    /// Forward pass for a single sample.
    ///
    /// Writes the normalized values into `x_hat` and the scaled/shifted result
    /// into `outputs`; returns the inverse standard deviation for backprop.
    ///
    /// Shape contract: `inputs`, `x_hat` and `outputs` all have length `dim`.
    pub fn forward(&self, inputs: &[f32], x_hat: &mut [f32], outputs: &mut [f32]) -> f32 {
        debug_assert_eq!(inputs.len(), self.dim);
        debug_assert_eq!(x_hat.len(), self.dim);
        debug_assert_eq!(outputs.len(), self.dim);

        let n = self.dim as f32;
        let mean = inputs.iter().sum::<f32>() / n;

        let mut var = 0.0_f32;
        for &x in inputs {
            let d = x - mean;
            var = d.mul_add(d, var);
        }
        var /= n;

        let inv_std = 1.0 / (var + EPS).sqrt();
        for i in 0..self.dim {
            let xh = (inputs[i] - mean) * inv_std;
            x_hat[i] = xh;
            outputs[i] = self.gain[i].mul_add(xh, self.bias[i]);
        }
        inv_std
    }

    /// Backward pass for a single sample.
    ///
    /// `x_hat` and `inv_std` are the values cached by `forward`. `d_inputs` is
    /// overwritten; `d_gain` / `d_bias` are accumulated into.
    pub fn backward(
        &self,
        x_hat: &[f32],
        inv_std: f32,
        d_outputs: &[f32],
        d_inputs: &mut [f32],
        d_gain: &mut [f32],
        d_bias: &mut [f32],
    ) {
        debug_assert_eq!(x_hat.len(), self.dim);
        debug_assert_eq!(d_outputs.len(), self.dim);
        debug_assert_eq!(d_inputs.len(), self.dim);
        debug_assert_eq!(d_gain.len(), self.dim);
        debug_assert_eq!(d_bias.len(), self.dim);

        let n = self.dim as f32;

        // d_inputs doubles as the d_x_hat buffer before the final combine.
        let mut sum_dxh = 0.0_f32;
        let mut sum_dxh_xh = 0.0_f32;
        for i in 0..self.dim {
            let d_y = d_outputs[i];
            d_gain[i] = d_y.mul_add(x_hat[i], d_gain[i]);
            d_bias[i] += d_y;

            let d_xh = d_y * self.gain[i];
            d_inputs[i] = d_xh;
            sum_dxh += d_xh;
            sum_dxh_xh = d_xh.mul_add(x_hat[i], sum_dxh_xh);
        }

        let mean_dxh = sum_dxh / n;
        let mean_dxh_xh = sum_dxh_xh / n;
        for i in 0..self.dim {
            d_inputs[i] = (d_inputs[i] - mean_dxh - x_hat[i] * mean_dxh_xh) * inv_std;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_normalizes_to_zero_mean_unit_variance() {
        let norm = LayerNorm::new(4).unwrap();
        let inputs = [1.0_f32, 2.0, 3.0, 4.0];
        let mut x_hat = [0.0_f32; 4];
        let mut out = [0.0_f32; 4];
        norm.forward(&inputs, &mut x_hat, &mut out);

        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|y| (y - mean) * (y - mean)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
        // Default gain/bias leave the normalized values unchanged.
        assert_eq!(x_hat, out);
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        let norm = LayerNorm::from_parts(
            3,
            vec![1.2, 0.8, -0.5],
            vec![0.1, -0.2, 0.3],
        )
        .unwrap();
        let inputs = [0.5_f32, -1.0, 2.0];
        let d_outputs = [0.7_f32, -0.3, 0.4];

        let mut x_hat = [0.0_f32; 3];
        let mut out = [0.0_f32; 3];
        let inv_std = norm.forward(&inputs, &mut x_hat, &mut out);

        let mut d_in = [0.0_f32; 3];
        let mut d_gain = [0.0_f32; 3];
        let mut d_bias = [0.0_f32; 3];
        norm.backward(&x_hat, inv_std, &d_outputs, &mut d_in, &mut d_gain, &mut d_bias);

        // Loss: sum(d_outputs[i] * y[i]) so dL/dy = d_outputs.
        let loss = |xs: &[f32; 3]| -> f32 {
            let mut xh = [0.0_f32; 3];
            let mut y = [0.0_f32; 3];
            norm.forward(xs, &mut xh, &mut y);
            y.iter().zip(&d_outputs).map(|(a, b)| a * b).sum()
        };

        let eps = 1e-3_f32;
        for i in 0..3 {
            let mut plus = inputs;
            plus[i] += eps;
            let mut minus = inputs;
            minus[i] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!(
                (d_in[i] - numeric).abs() < 1e-2,
                "analytic={} numeric={numeric}",
                d_in[i]
            );
        }
    }

    #[test]
    fn from_parts_rejects_bad_shapes() {
        assert!(LayerNorm::from_parts(2, vec![1.0], vec![0.0, 0.0]).is_err());
        assert!(LayerNorm::from_parts(2, vec![1.0, f32::INFINITY], vec![0.0, 0.0]).is_err());
        assert!(LayerNorm::from_parts(0, vec![], vec![]).is_err());
    }
}
