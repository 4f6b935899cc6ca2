//! Adam optimizer.
//!
//! State (first/second moments) lives outside the model, aligned with the
//! model's parameter-tensor order. The learning rate is passed in at each
//! step so the training loop can drive a schedule.

use crate::{Error, FullyConnectedModel, Gradients, Result};

#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    eps: f32,
    beta1_pow: f32,
    beta2_pow: f32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    /// Allocate bias-corrected Adam state for `model`.
    pub fn new(model: &FullyConnectedModel, beta1: f32, beta2: f32, eps: f32) -> Result<Self> {
        if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
            return Err(Error::InvalidConfig(format!(
                "adam beta1 must be finite and in [0,1), got {beta1}"
            )));
        }
        if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
            return Err(Error::InvalidConfig(format!(
                "adam beta2 must be finite and in [0,1), got {beta2}"
            )));
        }
        if !(eps.is_finite() && eps > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "adam eps must be finite and > 0, got {eps}"
            )));
        }

        let mut m = Vec::with_capacity(model.num_param_tensors());
        let mut v = Vec::with_capacity(model.num_param_tensors());
        for i in 0..model.num_param_tensors() {
            m.push(vec![0.0; model.param_tensor(i).len()]);
            v.push(vec![0.0; model.param_tensor(i).len()]);
        }

        Ok(Self {
            beta1,
            beta2,
            eps,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
            m,
            v,
        })
    }

    /// Apply one update: `param -= lr * m_hat / (sqrt(v_hat) + eps)`.
    pub fn step(&mut self, model: &mut FullyConnectedModel, grads: &Gradients, lr: f32) {
        assert!(
            lr.is_finite() && lr >= 0.0,
            "learning rate must be finite and >= 0"
        );
        assert_eq!(
            self.m.len(),
            model.num_param_tensors(),
            "adam state has {} tensors, model has {}",
            self.m.len(),
            model.num_param_tensors()
        );

        self.beta1_pow *= self.beta1;
        self.beta2_pow *= self.beta2;
        let corr1 = 1.0 - self.beta1_pow;
        let corr2 = 1.0 - self.beta2_pow;
        let one_minus_beta1 = 1.0 - self.beta1;
        let one_minus_beta2 = 1.0 - self.beta2;

        for t in 0..self.m.len() {
            let g = grads.tensor(t);
            let m = &mut self.m[t];
            let v = &mut self.v[t];
            let params = model.param_tensor_mut(t);
            debug_assert_eq!(g.len(), params.len());

            for i in 0..params.len() {
                let gi = g[i];
                m[i] = self.beta1 * m[i] + one_minus_beta1 * gi;
                v[i] = self.beta2 * v[i] + one_minus_beta2 * (gi * gi);

                let m_hat = m[i] / corr1;
                let v_hat = v[i] / corr2;
                params[i] -= lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}
