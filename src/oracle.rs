//! The fully connected oracle.
//!
//! A [`FullyConnectedOracle`] approximates the ground-truth score function
//! `f(x)` of a design-optimization benchmark: `fit` trains a
//! [`FullyConnectedModel`] on a dataset of designs and measurements, `predict`
//! serves scalar predictions from the stored model, and `score` is the
//! batched entry point that also handles encoding transforms and noise
//! injection.
//!
//! The oracle operates in a normalized space: measurements are always
//! standardized, continuous designs are standardized per feature, and
//! logit-encoded categorical designs are collapsed to class indices before
//! they reach the model.

use rand_distr::{Distribution, Normal};

use crate::train::train_model;
use crate::{
    DesignDataset, Encoding, Error, FitConfig, FullyConnectedModel, ModelConfig, Result, Scratch,
};

/// A trained network plus the validation diagnostic computed at fit time.
///
/// Created whole by `fit` or `load` and never mutated afterwards; re-fitting
/// or reloading replaces the entire value.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub(crate) model: FullyConnectedModel,
    pub(crate) rank_correlation: f64,
}

impl FittedModel {
    #[inline]
    pub fn model(&self) -> &FullyConnectedModel {
        &self.model
    }

    /// Spearman rank correlation on the validation split, measured once
    /// right after training.
    #[inline]
    pub fn rank_correlation(&self) -> f64 {
        self.rank_correlation
    }
}

#[derive(Debug, Clone)]
pub struct FullyConnectedOracle {
    encoding: Encoding,
    input_shape: Vec<usize>,
    /// Per-feature standardization for continuous designs; empty otherwise.
    x_mean: Vec<f32>,
    x_std: Vec<f32>,
    y_mean: f32,
    y_std: f32,
    noise_std: f32,
    internal_batch_size: usize,
    pub(crate) fitted: Option<FittedModel>,
}

impl FullyConnectedOracle {
    /// Create an oracle bound to `dataset`'s encoding and statistics.
    ///
    /// `noise_std` is the standard deviation of gaussian noise added by
    /// [`score`](Self::score); `batch_size` drives both training batches and
    /// batched scoring.
    pub fn new(dataset: &DesignDataset, noise_std: f32, batch_size: usize) -> Result<Self> {
        if !(noise_std.is_finite() && noise_std >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "noise_std must be finite and >= 0, got {noise_std}"
            )));
        }
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }

        let (y_mean, y_std) = mean_std(dataset.y(), 1, 0);
        let (x_mean, x_std) = match dataset.encoding() {
            Encoding::Continuous => {
                let d = dataset.design_len();
                let mut means = Vec::with_capacity(d);
                let mut stds = Vec::with_capacity(d);
                for pos in 0..d {
                    let (m, s) = mean_std(dataset.x(), d, pos);
                    means.push(m);
                    stds.push(s);
                }
                (means, stds)
            }
            Encoding::Categorical { .. } => (Vec::new(), Vec::new()),
        };

        Ok(Self {
            encoding: dataset.encoding(),
            input_shape: dataset.input_shape().to_vec(),
            x_mean,
            x_std,
            y_mean,
            y_std,
            noise_std,
            internal_batch_size: batch_size,
            fitted: None,
        })
    }

    /// Whether a dataset's design encoding is usable by this architecture.
    ///
    /// Accept-all policy: the embedding/flatten front end handles every
    /// encoding the dataset collaborator can produce, so no restriction is
    /// enforced.
    pub fn check_input_format(_dataset: &DesignDataset) -> bool {
        true
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[inline]
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    #[inline]
    pub fn noise_std(&self) -> f32 {
        self.noise_std
    }

    #[inline]
    pub fn internal_batch_size(&self) -> usize {
        self.internal_batch_size
    }

    /// The fitted model, if `fit` or `load` has succeeded.
    #[inline]
    pub fn fitted(&self) -> Option<&FittedModel> {
        self.fitted.as_ref()
    }

    #[inline]
    pub fn rank_correlation(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.rank_correlation)
    }

    /// Declared input shape with a trailing logit axis dropped.
    ///
    /// The logit axis is consumed by the categorical path, not fed to the
    /// network as an extra feature dimension.
    pub(crate) fn effective_input_shape(&self) -> &[usize] {
        match self.encoding {
            Encoding::Categorical { is_logits: true, .. } => {
                &self.input_shape[..self.input_shape.len() - 1]
            }
            _ => &self.input_shape,
        }
    }

    /// Transform dataset-encoded design rows into the model's input encoding.
    ///
    /// Continuous designs are standardized per feature; logit-encoded
    /// categorical designs are collapsed to argmax indices; index-encoded
    /// designs pass through.
    pub fn dataset_to_oracle_x(&self, x: &[f32]) -> Result<Vec<f32>> {
        let d: usize = self.input_shape.iter().product();
        if d == 0 || x.len() % d != 0 {
            return Err(Error::InvalidShape(format!(
                "x length {} is not a multiple of design_len {d}",
                x.len()
            )));
        }

        match self.encoding {
            Encoding::Continuous => Ok(x
                .iter()
                .enumerate()
                .map(|(i, &v)| (v - self.x_mean[i % d]) / self.x_std[i % d])
                .collect()),
            Encoding::Categorical {
                num_classes,
                is_logits: true,
            } => {
                let mut out = Vec::with_capacity(x.len() / num_classes);
                for logits in x.chunks_exact(num_classes) {
                    let mut best = 0;
                    for (c, &v) in logits.iter().enumerate() {
                        if v > logits[best] {
                            best = c;
                        }
                    }
                    out.push(best as f32);
                }
                Ok(out)
            }
            Encoding::Categorical {
                is_logits: false, ..
            } => Ok(x.to_vec()),
        }
    }

    /// Standardize measurements into the oracle's output space.
    pub fn dataset_to_oracle_y(&self, y: &[f32]) -> Vec<f32> {
        y.iter().map(|&v| (v - self.y_mean) / self.y_std).collect()
    }

    /// Map oracle-space predictions back to measurement units.
    pub fn oracle_to_dataset_y(&self, y: &[f32]) -> Vec<f32> {
        y.iter().map(|&v| v * self.y_std + self.y_mean).collect()
    }

    /// Train a surrogate on `dataset` and install it.
    ///
    /// Splits the dataset, builds the architecture from the training split's
    /// declared shape, optimizes mean-squared error with cosine-decayed Adam
    /// for `cfg.epochs` epochs, and measures Spearman rank correlation on the
    /// held-out split. On success the oracle's previous model (if any) is
    /// replaced by the new `(model, rank_correlation)` unit; the correlation
    /// is returned. On error the oracle is left unchanged.
    pub fn fit(&mut self, dataset: &DesignDataset, cfg: &FitConfig) -> Result<f64> {
        cfg.validate()?;
        if dataset.encoding() != self.encoding || dataset.input_shape() != self.input_shape {
            return Err(Error::InvalidData(format!(
                "dataset encoding {:?} / shape {:?} does not match oracle ({:?} / {:?})",
                dataset.encoding(),
                dataset.input_shape(),
                self.encoding,
                self.input_shape
            )));
        }

        let (training, validation) = dataset.split(cfg.val_fraction, cfg.seed)?;
        let validation_x = self.dataset_to_oracle_x(validation.x())?;
        let validation_y = self.dataset_to_oracle_y(validation.y());

        let num_classes = match self.encoding {
            Encoding::Categorical { num_classes, .. } => Some(num_classes),
            Encoding::Continuous => None,
        };
        let model_cfg = ModelConfig {
            hidden_size: cfg.hidden_size,
            activation: cfg.activation,
            num_layers: cfg.num_layers,
        };
        let mut model = FullyConnectedModel::build(
            self.effective_input_shape(),
            num_classes,
            &model_cfg,
            cfg.seed,
        )?;

        let training_x = self.dataset_to_oracle_x(training.x())?;
        let training_y = self.dataset_to_oracle_y(training.y());
        let final_loss = train_model(
            &mut model,
            &training_x,
            &training_y,
            cfg.epochs,
            self.internal_batch_size,
            cfg.learning_rate,
            cfg.seed,
        )?;

        let predictions = predict_rows(&model, &validation_x)?;
        let rank_correlation =
            crate::metrics::spearman_rank_correlation(&predictions, &validation_y);
        log::info!(
            "fit complete: final train mse {final_loss:.6}, validation rank correlation {rank_correlation:.4}"
        );

        self.fitted = Some(FittedModel {
            model,
            rank_correlation,
        });
        Ok(rank_correlation)
    }

    /// Predict one scalar per design, in input order.
    ///
    /// `x` holds a batch of designs already transformed into the model's
    /// input encoding (see [`dataset_to_oracle_x`](Self::dataset_to_oracle_x)).
    /// Uses only the stored model; fails with [`Error::NoModel`] before a
    /// model has been fitted or loaded.
    pub fn predict(&self, x: &[f32]) -> Result<Vec<f32>> {
        let fitted = self.fitted.as_ref().ok_or(Error::NoModel)?;
        if let Encoding::Categorical { num_classes, .. } = self.encoding {
            if x.iter().any(|&v| v < 0.0 || v >= num_classes as f32) {
                return Err(Error::InvalidData(format!(
                    "class indices must be in [0, {num_classes})"
                )));
            }
        }
        predict_rows(&fitted.model, x)
    }

    /// Batched scoring entry point.
    ///
    /// Accepts dataset-encoded design rows, applies the oracle's input
    /// transform, predicts in chunks of `internal_batch_size`, perturbs each
    /// prediction with gaussian noise of `noise_std` (in the normalized
    /// output space), and returns scores in measurement units.
    pub fn score(&self, x: &[f32]) -> Result<Vec<f32>> {
        let oracle_x = self.dataset_to_oracle_x(x)?;
        let fitted = self.fitted.as_ref().ok_or(Error::NoModel)?;
        let row_len = fitted.model.input_len();

        let mut predictions = Vec::with_capacity(oracle_x.len() / row_len.max(1));
        for chunk in oracle_x.chunks(row_len * self.internal_batch_size) {
            predictions.extend(self.predict(chunk)?);
        }

        if self.noise_std > 0.0 {
            let normal = Normal::new(0.0_f32, self.noise_std)
                .map_err(|e| Error::InvalidConfig(format!("invalid noise_std: {e}")))?;
            let mut rng = rand::thread_rng();
            for p in predictions.iter_mut() {
                *p += normal.sample(&mut rng);
            }
        }

        Ok(self.oracle_to_dataset_y(&predictions))
    }
}

fn predict_rows(model: &FullyConnectedModel, x: &[f32]) -> Result<Vec<f32>> {
    let row_len = model.input_len();
    if x.len() % row_len != 0 {
        return Err(Error::InvalidShape(format!(
            "x length {} is not a multiple of model input_len {row_len}",
            x.len()
        )));
    }

    let mut scratch = Scratch::new(model);
    let mut out = Vec::with_capacity(x.len() / row_len);
    for row in x.chunks_exact(row_len) {
        out.push(model.forward(row, &mut scratch));
    }
    Ok(out)
}

/// Mean and standard deviation of every `stride`-th value starting at
/// `offset`; a zero deviation is clamped to one so standardization stays
/// finite.
fn mean_std(values: &[f32], stride: usize, offset: usize) -> (f32, f32) {
    let mut n = 0.0_f32;
    let mut sum = 0.0_f32;
    for &v in values.iter().skip(offset).step_by(stride) {
        sum += v;
        n += 1.0;
    }
    let mean = sum / n;

    let mut var = 0.0_f32;
    for &v in values.iter().skip(offset).step_by(stride) {
        let d = v - mean;
        var = d.mul_add(d, var);
    }
    let std = (var / n).sqrt();
    (mean, if std > 0.0 { std } else { 1.0 })
}

// Seeded scoring used by tests; keeps noise deterministic without exposing
// RNG plumbing in the public scoring path.
#[cfg(test)]
impl FullyConnectedOracle {
    fn score_seeded(&self, x: &[f32], seed: u64) -> Result<Vec<f32>> {
        let oracle_x = self.dataset_to_oracle_x(x)?;
        let predictions = self.predict(&oracle_x)?;
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0_f32, self.noise_std).unwrap();
        let noisy: Vec<f32> = predictions
            .iter()
            .map(|&p| p + normal.sample(&mut rng))
            .collect();
        Ok(self.oracle_to_dataset_y(&noisy))
    }
}
