//! Category embedding.
//!
//! Categorical designs arrive as sequences of class indices. The embedding
//! maps each index to a dense row of the lookup table; the model flattens the
//! resulting `(seq_len, dim)` block into a single feature vector.

use rand::Rng;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Embedding {
    num_classes: usize,
    dim: usize,
    /// Row-major table with shape (num_classes, dim).
    table: Vec<f32>,
}

impl Embedding {
    pub fn new_with_rng<R: Rng + ?Sized>(
        num_classes: usize,
        dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if num_classes == 0 || dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "embedding dims must be > 0, got num_classes={num_classes} dim={dim}"
            )));
        }

        let mut table = vec![0.0; num_classes * dim];
        for v in table.iter_mut() {
            *v = rng.gen_range(-0.05..0.05);
        }

        Ok(Self {
            num_classes,
            dim,
            table,
        })
    }

    /// Rebuild from serialized parts, validating shapes and values.
    pub fn from_parts(num_classes: usize, dim: usize, table: Vec<f32>) -> Result<Self> {
        if num_classes == 0 || dim == 0 {
            return Err(Error::InvalidData(format!(
                "embedding dims must be > 0, got num_classes={num_classes} dim={dim}"
            )));
        }
        let expected = num_classes
            .checked_mul(dim)
            .ok_or_else(|| Error::InvalidData("embedding table shape overflow".to_owned()))?;
        if table.len() != expected {
            return Err(Error::InvalidData(format!(
                "embedding table length {} does not match num_classes * dim ({num_classes} * {dim})",
                table.len()
            )));
        }
        if table.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(
                "embedding table must contain only finite values".to_owned(),
            ));
        }
        Ok(Self {
            num_classes,
            dim,
            table,
        })
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn table(&self) -> &[f32] {
        &self.table
    }

    #[inline]
    pub(crate) fn table_mut(&mut self) -> &mut [f32] {
        &mut self.table
    }

    /// Look up each index and write the rows contiguously into `outputs`.
    ///
    /// Shape contract:
    /// - `indices` holds class indices stored as floats, each in `[0, num_classes)`
    /// - `outputs.len() == indices.len() * dim`
    pub fn forward(&self, indices: &[f32], outputs: &mut [f32]) {
        debug_assert_eq!(outputs.len(), indices.len() * self.dim);

        for (pos, &raw) in indices.iter().enumerate() {
            let idx = raw as usize;
            assert!(
                idx < self.num_classes && raw >= 0.0,
                "class index {raw} out of range for {} classes",
                self.num_classes
            );
            let row = idx * self.dim;
            let out = pos * self.dim;
            outputs[out..out + self.dim].copy_from_slice(&self.table[row..row + self.dim]);
        }
    }

    /// Accumulate `dL/d(table)` for the rows selected by `indices`.
    pub fn backward(&self, indices: &[f32], d_outputs: &[f32], d_table: &mut [f32]) {
        debug_assert_eq!(d_outputs.len(), indices.len() * self.dim);
        debug_assert_eq!(d_table.len(), self.table.len());

        for (pos, &raw) in indices.iter().enumerate() {
            let row = (raw as usize) * self.dim;
            let out = pos * self.dim;
            for j in 0..self.dim {
                d_table[row + j] += d_outputs[out + j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_copies_table_rows_in_order() {
        let table = vec![
            0.0, 0.1, // class 0
            1.0, 1.1, // class 1
            2.0, 2.1, // class 2
        ];
        let emb = Embedding::from_parts(3, 2, table).unwrap();
        let mut out = vec![0.0_f32; 4];
        emb.forward(&[2.0, 0.0], &mut out);
        assert_eq!(out, vec![2.0, 2.1, 0.0, 0.1]);
    }

    #[test]
    fn backward_accumulates_into_selected_rows() {
        let emb = Embedding::from_parts(2, 2, vec![0.0; 4]).unwrap();
        let mut d_table = vec![0.0_f32; 4];
        // The same class twice accumulates twice into its row.
        emb.backward(&[1.0, 1.0], &[0.5, 0.5, 0.25, 0.25], &mut d_table);
        assert_eq!(d_table, vec![0.0, 0.0, 0.75, 0.75]);
    }

    #[test]
    #[should_panic]
    fn forward_panics_on_out_of_range_index() {
        let emb = Embedding::from_parts(2, 1, vec![0.0; 2]).unwrap();
        let mut out = vec![0.0_f32; 1];
        emb.forward(&[5.0], &mut out);
    }

    #[test]
    fn from_parts_rejects_bad_tables() {
        assert!(Embedding::from_parts(2, 2, vec![0.0; 3]).is_err());
        assert!(Embedding::from_parts(2, 2, vec![f32::NAN; 4]).is_err());
        assert!(Embedding::from_parts(0, 2, vec![]).is_err());
    }
}
