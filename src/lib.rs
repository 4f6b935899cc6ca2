//! A fully connected surrogate oracle for design-optimization benchmarks.
//!
//! `design-oracle` is a small-core, from-scratch implementation of a trainable
//! stand-in for an expensive ground-truth score function `f(x)`: fit a dense
//! feed-forward network to a dataset of design values `x` and scalar
//! measurements `y`, then serve predictions for new designs.
//!
//! # Design goals
//!
//! - Predictable performance: reuse buffers ([`Scratch`] / [`Gradients`])
//!   instead of allocating in the per-sample hot path.
//! - Clear contracts: shapes are explicit and validated at the API boundary.
//! - A practical fit procedure: seeded train/validation split, mini-batch
//!   Adam with a cosine-decayed learning rate, and a Spearman rank
//!   correlation diagnostic on the held-out split.
//! - Stable persistence: a versioned model snapshot inside a two-entry
//!   compressed archive that round-trips bit-identically.
//!
//! # Panics vs `Result`
//!
//! Two layers of API, as in the training hot path this crate is organized
//! around:
//!
//! - Low-level per-sample calls ([`FullyConnectedModel::forward`] /
//!   [`FullyConnectedModel::backward`]) treat shape mismatches as programmer
//!   error and panic via `assert!`.
//! - High-level calls ([`FullyConnectedOracle::fit`],
//!   [`FullyConnectedOracle::predict`], save/load) validate inputs and return
//!   [`Result`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32` (the stored rank correlation is `f64`).
//! - Designs and measurements live in contiguous row-major buffers.
//! - Continuous designs are feature vectors; categorical designs are
//!   sequences of class indices, optionally logit-encoded with a trailing
//!   per-class axis that the oracle collapses before the embedding.
//!
//! # Quick start
//!
//! ```rust
//! use design_oracle::{DesignDataset, FitConfig, FullyConnectedOracle};
//!
//! # fn main() -> design_oracle::Result<()> {
//! // 100 designs of width 8 with a scalar measurement each.
//! let mut x = Vec::new();
//! let mut y = Vec::new();
//! for i in 0..100 {
//!     let row: Vec<f32> = (0..8).map(|j| ((i * 7 + j * 3) % 19) as f32 / 19.0).collect();
//!     y.push(row.iter().sum::<f32>());
//!     x.extend(row);
//! }
//! let dataset = DesignDataset::continuous(x, y, vec![8])?;
//!
//! let mut oracle = FullyConnectedOracle::new(&dataset, 0.0, 32)?;
//! let rho = oracle.fit(
//!     &dataset,
//!     &FitConfig {
//!         hidden_size: 32,
//!         num_layers: 1,
//!         epochs: 1,
//!         ..Default::default()
//!     },
//! )?;
//! assert!((-1.0..=1.0).contains(&rho));
//!
//! let inputs = oracle.dataset_to_oracle_x(dataset.x())?;
//! let predictions = oracle.predict(&inputs)?;
//! assert_eq!(predictions.len(), dataset.len());
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod layer;
pub mod metrics;
pub mod model;
pub mod norm;
pub mod optim;
pub mod oracle;
pub mod persist;
pub mod train;

pub use activation::Activation;
pub use dataset::{DesignDataset, Encoding};
pub use embedding::Embedding;
pub use error::{Error, Result};
pub use layer::{Dense, Init};
pub use metrics::spearman_rank_correlation;
pub use model::{FullyConnectedModel, Gradients, ModelConfig, Scratch};
pub use norm::LayerNorm;
pub use optim::Adam;
pub use oracle::{FittedModel, FullyConnectedOracle};
pub use persist::{
    SerializedModel, MODEL_ENTRY, MODEL_FORMAT_VERSION, RANK_CORRELATION_ENTRY,
};
pub use train::{FitConfig, LrSchedule};
