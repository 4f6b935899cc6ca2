//! Training loop: mini-batch MSE with Adam and a cosine-decayed learning rate.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{Activation, Adam, Error, FullyConnectedModel, Result};

#[derive(Debug, Clone, Copy)]
/// Hyperparameters for [`crate::FullyConnectedOracle::fit`].
pub struct FitConfig {
    /// Width of the hidden blocks.
    pub hidden_size: usize,
    /// Nonlinearity inside each hidden block.
    pub activation: Activation,
    /// Number of hidden blocks.
    pub num_layers: usize,
    /// Training epochs; each epoch reads a freshly shuffled pass over the
    /// training split.
    pub epochs: usize,
    /// Initial learning rate; decays to zero over the full training horizon.
    pub learning_rate: f32,
    /// Fraction of the dataset held out for validation.
    pub val_fraction: f32,
    /// Seed for splitting, weight init, and epoch shuffles.
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            hidden_size: 512,
            activation: Activation::ReLU,
            num_layers: 2,
            epochs: 5,
            learning_rate: 1e-3,
            val_fraction: 0.1,
            seed: 0,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(Error::InvalidConfig("hidden_size must be > 0".to_owned()));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(
                "learning_rate must be finite and > 0".to_owned(),
            ));
        }
        if !(self.val_fraction > 0.0 && self.val_fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "val_fraction must be in (0, 1), got {}",
                self.val_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
/// Per-step learning rate.
pub enum LrSchedule {
    Constant(f32),
    /// Smooth cosine decay from `initial` at step 0 to zero at `total_steps`.
    CosineDecay { initial: f32, total_steps: usize },
}

impl LrSchedule {
    #[inline]
    pub fn lr(&self, step: usize) -> f32 {
        match *self {
            LrSchedule::Constant(lr) => lr,
            LrSchedule::CosineDecay {
                initial,
                total_steps,
            } => {
                if total_steps == 0 {
                    return initial;
                }
                let frac = step.min(total_steps) as f32 / total_steps as f32;
                0.5 * (1.0 + (std::f32::consts::PI * frac).cos()) * initial
            }
        }
    }
}

/// Fit `model` to training rows `x` (flat, row-major) and targets `y`.
///
/// One Adam step per mini-batch against mean-squared error, with the
/// learning rate cosine-decayed over `epochs * ceil(n / batch_size)` steps.
/// Returns the mean training loss of the final epoch.
pub(crate) fn train_model(
    model: &mut FullyConnectedModel,
    x: &[f32],
    y: &[f32],
    epochs: usize,
    batch_size: usize,
    learning_rate: f32,
    seed: u64,
) -> Result<f32> {
    let row_len = model.input_len();
    if y.is_empty() {
        return Err(Error::InvalidData(
            "training split must not be empty".to_owned(),
        ));
    }
    if x.len() != y.len() * row_len {
        return Err(Error::InvalidShape(format!(
            "training x length {} does not match len * input_len ({} * {row_len})",
            x.len(),
            y.len()
        )));
    }
    if batch_size == 0 {
        return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
    }

    let n = y.len();
    let steps_per_epoch = n.div_ceil(batch_size);
    let schedule = LrSchedule::CosineDecay {
        initial: learning_rate,
        total_steps: steps_per_epoch * epochs,
    };

    let mut adam = Adam::new(model, 0.9, 0.999, 1e-8)?;
    let mut scratch = model.scratch();
    let mut grads = model.gradients();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut perm: Vec<usize> = (0..n).collect();

    let mut step = 0;
    let mut epoch_loss = 0.0_f32;
    for epoch in 0..epochs {
        perm.shuffle(&mut rng);
        epoch_loss = 0.0;

        for batch in perm.chunks(batch_size) {
            grads.zero();
            let inv_b = 1.0 / batch.len() as f32;

            for &idx in batch {
                let row = &x[idx * row_len..(idx + 1) * row_len];
                let pred = model.forward(row, &mut scratch);
                let diff = pred - y[idx];
                epoch_loss += 0.5 * diff * diff;

                grads.d_output_mut()[0] = diff * inv_b;
                model.backward(row, &scratch, &mut grads);
            }

            adam.step(model, &grads, schedule.lr(step));
            step += 1;
        }

        epoch_loss /= n as f32;
        log::debug!("epoch {epoch}: train mse {epoch_loss:.6}");
    }

    Ok(epoch_loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelConfig;

    #[test]
    fn cosine_decay_endpoints_and_midpoint() {
        let sched = LrSchedule::CosineDecay {
            initial: 1.0,
            total_steps: 100,
        };
        assert!((sched.lr(0) - 1.0).abs() < 1e-6);
        assert!((sched.lr(50) - 0.5).abs() < 1e-6);
        assert!(sched.lr(100).abs() < 1e-6);
        // Past the horizon the rate stays at zero.
        assert!(sched.lr(500).abs() < 1e-6);
    }

    #[test]
    fn fit_config_validation() {
        assert!(FitConfig::default().validate().is_ok());
        assert!(FitConfig {
            epochs: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(FitConfig {
            learning_rate: -1.0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(FitConfig {
            val_fraction: 1.5,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn training_reduces_loss_on_a_linear_target() {
        let cfg = ModelConfig {
            hidden_size: 8,
            activation: Activation::Tanh,
            num_layers: 1,
        };
        let mut model = FullyConnectedModel::build(&[2], None, &cfg, 3).unwrap();

        // y = 0.5 * x0 - 0.25 * x1 on a small grid.
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let a = (i as f32 / 10.0) - 1.0;
            let b = ((i * 7 % 20) as f32 / 10.0) - 1.0;
            x.extend_from_slice(&[a, b]);
            y.push(0.5 * a - 0.25 * b);
        }

        let first = train_model(&mut model, &x, &y, 1, 4, 1e-2, 0).unwrap();
        let last = train_model(&mut model, &x, &y, 50, 4, 1e-2, 0).unwrap();
        assert!(last < first, "loss did not decrease: {first} -> {last}");
    }

    #[test]
    fn training_rejects_mismatched_rows() {
        let cfg = ModelConfig {
            hidden_size: 4,
            activation: Activation::ReLU,
            num_layers: 1,
        };
        let mut model = FullyConnectedModel::build(&[2], None, &cfg, 0).unwrap();
        let err = train_model(&mut model, &[0.0; 5], &[0.0; 2], 1, 2, 1e-3, 0);
        assert!(err.is_err());
    }
}
