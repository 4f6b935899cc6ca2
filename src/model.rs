//! The fully connected surrogate network.
//!
//! Architecture, in order:
//!
//! - optional [`Embedding`] (categorical designs only), mapping each class
//!   index to a dense row
//! - a flatten step collapsing sequence dimensions into one feature vector
//!   (a no-op on the contiguous buffers used here)
//! - `num_layers` hidden blocks: dense -> layer norm -> nonlinearity
//! - a single-unit dense head producing the scalar prediction
//!
//! Like the per-sample hot path this crate is built around, `forward` and
//! `backward` reuse caller-owned [`Scratch`] / [`Gradients`] buffers and treat
//! shape misuse as programmer error (assertions), while the construction APIs
//! validate and return [`Result`].

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{Activation, Dense, Embedding, Error, Init, LayerNorm, Result};

#[derive(Debug, Clone, Copy)]
/// Architecture hyperparameters.
pub struct ModelConfig {
    /// Width of the hidden blocks (and of the embedding rows).
    pub hidden_size: usize,
    /// Nonlinearity applied inside each hidden block.
    pub activation: Activation,
    /// Number of dense -> layer norm -> nonlinearity blocks.
    pub num_layers: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 512,
            activation: Activation::ReLU,
            num_layers: 2,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(Error::InvalidConfig("hidden_size must be > 0".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) dense: Dense,
    pub(crate) norm: LayerNorm,
}

#[derive(Debug, Clone)]
pub struct FullyConnectedModel {
    pub(crate) embedding: Option<Embedding>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) head: Dense,
    pub(crate) activation: Activation,
    /// Flattened per-design input length (class indices for categorical
    /// designs, features otherwise).
    pub(crate) input_len: usize,
}

impl FullyConnectedModel {
    /// Build a freshly initialized network for designs of `input_shape`.
    ///
    /// `num_classes` is `Some` for categorical designs and enables the
    /// embedding path; the caller is responsible for dropping a trailing
    /// logit axis from `input_shape` beforehand.
    pub fn build(
        input_shape: &[usize],
        num_classes: Option<usize>,
        cfg: &ModelConfig,
        seed: u64,
    ) -> Result<Self> {
        cfg.validate()?;
        if input_shape.is_empty() || input_shape.contains(&0) {
            return Err(Error::InvalidShape(format!(
                "input shape must be non-empty with positive dims, got {input_shape:?}"
            )));
        }

        let input_len: usize = input_shape.iter().product();
        let mut rng = StdRng::seed_from_u64(seed);

        let embedding = match num_classes {
            Some(nc) => Some(Embedding::new_with_rng(nc, cfg.hidden_size, &mut rng)?),
            None => None,
        };

        let features = if embedding.is_some() {
            input_len * cfg.hidden_size
        } else {
            input_len
        };

        let init = match cfg.activation {
            Activation::ReLU => Init::He,
            Activation::Tanh | Activation::Identity => Init::Xavier,
        };

        let mut blocks = Vec::with_capacity(cfg.num_layers);
        let mut in_dim = features;
        for _ in 0..cfg.num_layers {
            blocks.push(Block {
                dense: Dense::new_with_rng(in_dim, cfg.hidden_size, init, &mut rng)?,
                norm: LayerNorm::new(cfg.hidden_size)?,
            });
            in_dim = cfg.hidden_size;
        }

        let head = Dense::new_with_rng(in_dim, 1, Init::Xavier, &mut rng)?;

        Ok(Self {
            embedding,
            blocks,
            head,
            activation: cfg.activation,
            input_len,
        })
    }

    /// Reassemble a network from deserialized parts, validating that the
    /// layers chain together.
    pub(crate) fn from_parts(
        embedding: Option<Embedding>,
        blocks: Vec<Block>,
        head: Dense,
        activation: Activation,
        input_len: usize,
    ) -> Result<Self> {
        if input_len == 0 {
            return Err(Error::InvalidData("input_len must be > 0".to_owned()));
        }

        let mut dim = match &embedding {
            Some(emb) => input_len * emb.dim(),
            None => input_len,
        };
        for (i, block) in blocks.iter().enumerate() {
            if block.dense.in_dim() != dim {
                return Err(Error::InvalidData(format!(
                    "block {i} in_dim {} does not match previous width {dim}",
                    block.dense.in_dim()
                )));
            }
            if block.norm.dim() != block.dense.out_dim() {
                return Err(Error::InvalidData(format!(
                    "block {i} norm dim {} does not match dense out_dim {}",
                    block.norm.dim(),
                    block.dense.out_dim()
                )));
            }
            dim = block.dense.out_dim();
        }
        if head.in_dim() != dim {
            return Err(Error::InvalidData(format!(
                "head in_dim {} does not match previous width {dim}",
                head.in_dim()
            )));
        }
        if head.out_dim() != 1 {
            return Err(Error::InvalidData(format!(
                "head must have a single output, got {}",
                head.out_dim()
            )));
        }

        Ok(Self {
            embedding,
            blocks,
            head,
            activation,
            input_len,
        })
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_categorical(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn scratch(&self) -> Scratch {
        Scratch::new(self)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    /// Number of parameter tensors, in optimizer order: embedding table (if
    /// any), then per block weights/biases/gain/bias, then head weights/biases.
    pub(crate) fn num_param_tensors(&self) -> usize {
        usize::from(self.embedding.is_some()) + 4 * self.blocks.len() + 2
    }

    pub(crate) fn param_tensor(&self, idx: usize) -> &[f32] {
        let mut k = idx;
        if let Some(emb) = &self.embedding {
            if k == 0 {
                return emb.table();
            }
            k -= 1;
        }
        if k < 4 * self.blocks.len() {
            let block = &self.blocks[k / 4];
            return match k % 4 {
                0 => block.dense.weights(),
                1 => block.dense.biases(),
                2 => block.norm.gain(),
                _ => block.norm.bias(),
            };
        }
        k -= 4 * self.blocks.len();
        match k {
            0 => self.head.weights(),
            1 => self.head.biases(),
            _ => panic!("parameter tensor index {idx} out of range"),
        }
    }

    pub(crate) fn param_tensor_mut(&mut self, idx: usize) -> &mut [f32] {
        let mut k = idx;
        if let Some(emb) = &mut self.embedding {
            if k == 0 {
                return emb.table_mut();
            }
            k -= 1;
        }
        if k < 4 * self.blocks.len() {
            let block = &mut self.blocks[k / 4];
            return match k % 4 {
                0 => block.dense.weights_mut(),
                1 => block.dense.biases_mut(),
                2 => block.norm.gain_mut(),
                _ => block.norm.bias_mut(),
            };
        }
        k -= 4 * self.blocks.len();
        match k {
            0 => self.head.weights_mut(),
            1 => self.head.biases_mut(),
            _ => panic!("parameter tensor index {idx} out of range"),
        }
    }

    /// Forward pass for a single design, returning the scalar prediction.
    ///
    /// Shape contract:
    /// - `input.len() == self.input_len()`
    /// - `scratch` must be built for this model
    pub fn forward(&self, input: &[f32], scratch: &mut Scratch) -> f32 {
        assert_eq!(
            input.len(),
            self.input_len,
            "input len {} does not match model input_len {}",
            input.len(),
            self.input_len
        );
        assert_eq!(
            scratch.out.len(),
            self.blocks.len(),
            "scratch has {} block outputs, model has {} blocks",
            scratch.out.len(),
            self.blocks.len()
        );

        if let Some(emb) = &self.embedding {
            emb.forward(input, &mut scratch.embedded);
        }

        for (i, block) in self.blocks.iter().enumerate() {
            if i == 0 {
                let feats: &[f32] = if self.embedding.is_some() {
                    &scratch.embedded
                } else {
                    input
                };
                block.dense.forward(feats, &mut scratch.z[0]);
            } else {
                block.dense.forward(&scratch.out[i - 1], &mut scratch.z[i]);
            }
            scratch.inv_std[i] =
                block
                    .norm
                    .forward(&scratch.z[i], &mut scratch.x_hat[i], &mut scratch.out[i]);
            for v in scratch.out[i].iter_mut() {
                *v = self.activation.forward(*v);
            }
        }

        let head_in: &[f32] = match scratch.out.last() {
            Some(last) => last,
            None if self.embedding.is_some() => &scratch.embedded,
            None => input,
        };
        self.head.forward(head_in, &mut scratch.head_out);
        scratch.head_out[0]
    }

    /// Backward pass for a single design.
    ///
    /// Call `forward` first with the same `input` and `scratch`, then write
    /// the upstream gradient `dL/d(prediction)` into `grads.d_output_mut()`.
    /// Parameter gradients are *accumulated*; the training loop zeroes them
    /// once per batch via [`Gradients::zero`].
    pub fn backward(&self, input: &[f32], scratch: &Scratch, grads: &mut Gradients) {
        assert_eq!(
            input.len(),
            self.input_len,
            "input len {} does not match model input_len {}",
            input.len(),
            self.input_len
        );
        assert_eq!(
            grads.tensors.len(),
            self.num_param_tensors(),
            "grads has {} tensors, model has {}",
            grads.tensors.len(),
            self.num_param_tensors()
        );

        let emb_off = usize::from(self.embedding.is_some());
        let n_blocks = self.blocks.len();

        // Head.
        {
            let head_in: &[f32] = match scratch.out.last() {
                Some(last) => last,
                None if self.embedding.is_some() => &scratch.embedded,
                None => input,
            };
            let d_in: Option<&mut [f32]> = if n_blocks > 0 {
                Some(&mut grads.d_out[n_blocks - 1])
            } else if self.embedding.is_some() {
                Some(&mut grads.d_feats)
            } else {
                None
            };
            let (d_w, d_b) = tensor_pair(&mut grads.tensors, emb_off + 4 * n_blocks);
            self.head.backward(head_in, &grads.d_head, d_in, d_w, d_b);
        }

        // Hidden blocks, last to first.
        for i in (0..n_blocks).rev() {
            let block = &self.blocks[i];

            // Nonlinearity, in place on d_out using the cached outputs.
            for (d, &y) in grads.d_out[i].iter_mut().zip(&scratch.out[i]) {
                *d *= self.activation.grad_from_output(y);
            }

            {
                let (d_gain, d_bias) = tensor_pair(&mut grads.tensors, emb_off + 4 * i + 2);
                block.norm.backward(
                    &scratch.x_hat[i],
                    scratch.inv_std[i],
                    &grads.d_out[i],
                    &mut grads.d_z[i],
                    d_gain,
                    d_bias,
                );
            }

            let (d_w, d_b) = tensor_pair(&mut grads.tensors, emb_off + 4 * i);
            if i == 0 {
                let feats: &[f32] = if self.embedding.is_some() {
                    &scratch.embedded
                } else {
                    input
                };
                let d_in = if self.embedding.is_some() {
                    Some(&mut grads.d_feats[..])
                } else {
                    None
                };
                block.dense.backward(feats, &grads.d_z[0], d_in, d_w, d_b);
            } else {
                let (d_prev, _) = grads.d_out.split_at_mut(i);
                block.dense.backward(
                    &scratch.out[i - 1],
                    &grads.d_z[i],
                    Some(&mut d_prev[i - 1]),
                    d_w,
                    d_b,
                );
            }
        }

        if let Some(emb) = &self.embedding {
            emb.backward(input, &grads.d_feats, &mut grads.tensors[0]);
        }
    }
}

// Adjacent parameter-gradient tensors (weights + biases, or gain + bias).
fn tensor_pair(tensors: &mut [Vec<f32>], first: usize) -> (&mut [f32], &mut [f32]) {
    let (left, right) = tensors.split_at_mut(first + 1);
    (&mut left[first], &mut right[0])
}

/// Reusable forward-pass buffers for a specific [`FullyConnectedModel`].
#[derive(Debug, Clone)]
pub struct Scratch {
    embedded: Vec<f32>,
    z: Vec<Vec<f32>>,
    x_hat: Vec<Vec<f32>>,
    inv_std: Vec<f32>,
    out: Vec<Vec<f32>>,
    head_out: Vec<f32>,
}

impl Scratch {
    pub fn new(model: &FullyConnectedModel) -> Self {
        let embedded = match &model.embedding {
            Some(emb) => vec![0.0; model.input_len * emb.dim()],
            None => Vec::new(),
        };

        let mut z = Vec::with_capacity(model.blocks.len());
        let mut x_hat = Vec::with_capacity(model.blocks.len());
        let mut out = Vec::with_capacity(model.blocks.len());
        for block in &model.blocks {
            z.push(vec![0.0; block.dense.out_dim()]);
            x_hat.push(vec![0.0; block.dense.out_dim()]);
            out.push(vec![0.0; block.dense.out_dim()]);
        }

        Self {
            embedded,
            z,
            x_hat,
            inv_std: vec![0.0; model.blocks.len()],
            out,
            head_out: vec![0.0; 1],
        }
    }

    /// The prediction produced by the most recent `forward`.
    #[inline]
    pub fn output(&self) -> f32 {
        self.head_out[0]
    }
}

/// Parameter gradients plus backprop intermediates for a specific model.
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Parameter gradients, aligned with the model's tensor order.
    tensors: Vec<Vec<f32>>,
    d_out: Vec<Vec<f32>>,
    d_z: Vec<Vec<f32>>,
    d_feats: Vec<f32>,
    d_head: Vec<f32>,
}

impl Gradients {
    pub fn new(model: &FullyConnectedModel) -> Self {
        let mut tensors = Vec::with_capacity(model.num_param_tensors());
        for i in 0..model.num_param_tensors() {
            tensors.push(vec![0.0; model.param_tensor(i).len()]);
        }

        let mut d_out = Vec::with_capacity(model.blocks.len());
        let mut d_z = Vec::with_capacity(model.blocks.len());
        for block in &model.blocks {
            d_out.push(vec![0.0; block.dense.out_dim()]);
            d_z.push(vec![0.0; block.dense.out_dim()]);
        }

        let d_feats = match &model.embedding {
            Some(emb) => vec![0.0; model.input_len * emb.dim()],
            None => Vec::new(),
        };

        Self {
            tensors,
            d_out,
            d_z,
            d_feats,
            d_head: vec![0.0; 1],
        }
    }

    /// Zero the accumulated parameter gradients (start of a batch).
    pub fn zero(&mut self) {
        for t in self.tensors.iter_mut() {
            t.fill(0.0);
        }
    }

    /// Upstream gradient buffer for the scalar prediction.
    #[inline]
    pub fn d_output_mut(&mut self) -> &mut [f32] {
        &mut self.d_head
    }

    #[inline]
    pub(crate) fn tensor(&self, idx: usize) -> &[f32] {
        &self.tensors[idx]
    }
}
