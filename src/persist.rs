//! Trained-oracle persistence.
//!
//! Two layers, kept deliberately separate:
//!
//! - a versioned, stable snapshot of the network (we do NOT serialize the
//!   internal structs directly, so the on-disk format survives refactors;
//!   deserialization validates dimensions, chaining, and finiteness)
//! - a compressed archive with exactly two named entries: the snapshot bytes
//!   and the stored rank correlation as a raw little-endian scalar
//!
//! A saved and reloaded oracle produces bit-identical predictions and an
//! identical correlation value.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::model::Block;
use crate::{
    Activation, Dense, Embedding, Error, FittedModel, FullyConnectedModel, FullyConnectedOracle,
    LayerNorm, Result,
};

/// Archive entry holding the model snapshot bytes.
pub const MODEL_ENTRY: &str = "fully_connected.h5";
/// Archive entry holding the rank correlation as 8 little-endian bytes.
pub const RANK_CORRELATION_ENTRY: &str = "rank_correlation.npy";

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedModel {
    pub format_version: u32,
    pub input_len: usize,
    pub activation: SerializedActivation,
    pub embedding: Option<SerializedEmbedding>,
    pub blocks: Vec<SerializedBlock>,
    pub head: SerializedDense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEmbedding {
    pub num_classes: usize,
    pub dim: usize,
    /// Row-major (num_classes, dim).
    pub table: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedBlock {
    pub dense: SerializedDense,
    pub norm: SerializedNorm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedDense {
    pub in_dim: usize,
    pub out_dim: usize,
    /// Row-major (out_dim, in_dim).
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNorm {
    pub dim: usize,
    pub gain: Vec<f32>,
    pub bias: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedActivation {
    Relu,
    Tanh,
    Identity,
}

impl From<Activation> for SerializedActivation {
    fn from(value: Activation) -> Self {
        match value {
            Activation::ReLU => SerializedActivation::Relu,
            Activation::Tanh => SerializedActivation::Tanh,
            Activation::Identity => SerializedActivation::Identity,
        }
    }
}

impl SerializedActivation {
    fn into_activation(self) -> Activation {
        match self {
            SerializedActivation::Relu => Activation::ReLU,
            SerializedActivation::Tanh => Activation::Tanh,
            SerializedActivation::Identity => Activation::Identity,
        }
    }
}

impl From<&FullyConnectedModel> for SerializedModel {
    fn from(model: &FullyConnectedModel) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            input_len: model.input_len,
            activation: model.activation.into(),
            embedding: model.embedding.as_ref().map(|emb| SerializedEmbedding {
                num_classes: emb.num_classes(),
                dim: emb.dim(),
                table: emb.table().to_vec(),
            }),
            blocks: model
                .blocks
                .iter()
                .map(|block| SerializedBlock {
                    dense: serialize_dense(&block.dense),
                    norm: SerializedNorm {
                        dim: block.norm.dim(),
                        gain: block.norm.gain().to_vec(),
                        bias: block.norm.bias().to_vec(),
                    },
                })
                .collect(),
            head: serialize_dense(&model.head),
        }
    }
}

fn serialize_dense(dense: &Dense) -> SerializedDense {
    SerializedDense {
        in_dim: dense.in_dim(),
        out_dim: dense.out_dim(),
        weights: dense.weights().to_vec(),
        biases: dense.biases().to_vec(),
    }
}

impl TryFrom<SerializedModel> for FullyConnectedModel {
    type Error = Error;

    fn try_from(value: SerializedModel) -> std::result::Result<Self, Self::Error> {
        if value.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported model format_version {}; expected {MODEL_FORMAT_VERSION}",
                value.format_version
            )));
        }

        let embedding = value
            .embedding
            .map(|emb| Embedding::from_parts(emb.num_classes, emb.dim, emb.table))
            .transpose()?;

        let mut blocks = Vec::with_capacity(value.blocks.len());
        for (i, block) in value.blocks.into_iter().enumerate() {
            let dense = Dense::from_parts(
                block.dense.in_dim,
                block.dense.out_dim,
                block.dense.weights,
                block.dense.biases,
            )
            .map_err(|e| Error::InvalidData(format!("block {i} dense invalid: {e}")))?;
            let norm = LayerNorm::from_parts(block.norm.dim, block.norm.gain, block.norm.bias)
                .map_err(|e| Error::InvalidData(format!("block {i} norm invalid: {e}")))?;
            blocks.push(Block { dense, norm });
        }

        let head = Dense::from_parts(
            value.head.in_dim,
            value.head.out_dim,
            value.head.weights,
            value.head.biases,
        )
        .map_err(|e| Error::InvalidData(format!("head invalid: {e}")))?;

        FullyConnectedModel::from_parts(
            embedding,
            blocks,
            head,
            value.activation.into_activation(),
            value.input_len,
        )
    }
}

impl FullyConnectedModel {
    /// Serialize to the versioned snapshot as compact JSON.
    pub fn to_json_string(&self) -> Result<String> {
        let ser = SerializedModel::from(self);
        serde_json::to_string(&ser)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Parse a snapshot, validating every layer before reassembly.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedModel = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse model json: {e}")))?;
        ser.try_into()
    }
}

impl FullyConnectedOracle {
    /// Write the fitted model and its rank correlation into a two-entry
    /// compressed archive.
    ///
    /// Fails with [`Error::NoModel`] if nothing has been fitted or loaded.
    pub fn save<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let fitted = self.fitted.as_ref().ok_or(Error::NoModel)?;
        let snapshot = fitted.model.to_json_string()?;

        let mut archive = ZipWriter::new(writer);
        let options = SimpleFileOptions::default();

        archive
            .start_file(MODEL_ENTRY, options)
            .map_err(archive_err)?;
        archive.write_all(snapshot.as_bytes())?;

        archive
            .start_file(RANK_CORRELATION_ENTRY, options)
            .map_err(archive_err)?;
        archive.write_all(&fitted.rank_correlation.to_le_bytes())?;

        archive.finish().map_err(archive_err)?;
        Ok(())
    }

    /// Read both archive entries and install the reconstructed model.
    ///
    /// The previous model (if any) is replaced only after both entries parse.
    pub fn load<R: Read + Seek>(&mut self, reader: R) -> Result<()> {
        let mut archive = ZipArchive::new(reader).map_err(archive_err)?;

        let snapshot = read_entry(&mut archive, MODEL_ENTRY)?;
        let rank_bytes = read_entry(&mut archive, RANK_CORRELATION_ENTRY)?;

        let rank_bytes: [u8; 8] = rank_bytes.as_slice().try_into().map_err(|_| {
            Error::Archive(format!(
                "{RANK_CORRELATION_ENTRY} must hold exactly 8 bytes"
            ))
        })?;
        let rank_correlation = f64::from_le_bytes(rank_bytes);

        let snapshot = std::str::from_utf8(&snapshot)
            .map_err(|e| Error::Archive(format!("{MODEL_ENTRY} is not valid utf-8: {e}")))?;
        let model = FullyConnectedModel::from_json_str(snapshot)?;

        self.fitted = Some(FittedModel {
            model,
            rank_correlation,
        });
        Ok(())
    }

    /// Save the trained oracle to an archive file.
    ///
    /// Checked before the file is created, so a failed save leaves nothing
    /// behind on disk.
    pub fn save_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.fitted.is_none() {
            return Err(Error::NoModel);
        }
        let p = path.as_ref();
        let file = File::create(p)
            .map_err(|e| Error::Io(format!("failed to create {}: {e}", p.display())))?;
        self.save(file)
    }

    /// Load a trained oracle from an archive file.
    pub fn load_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let p = path.as_ref();
        let file = File::open(p)
            .map_err(|e| Error::Io(format!("failed to open {}: {e}", p.display())))?;
        self.load(file)
    }
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| Error::Archive(format!("missing entry {name}: {e}")))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

fn archive_err(e: zip::result::ZipError) -> Error {
    Error::Archive(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DesignDataset, FitConfig, ModelConfig};
    use std::io::Cursor;

    fn trained_oracle() -> (FullyConnectedOracle, Vec<f32>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let a = (i as f32) / 20.0 - 1.0;
            let b = ((i * 13 % 40) as f32) / 20.0 - 1.0;
            x.extend_from_slice(&[a, b]);
            y.push(a - 2.0 * b);
        }
        let data = DesignDataset::continuous(x, y, vec![2]).unwrap();
        let mut oracle = FullyConnectedOracle::new(&data, 0.0, 8).unwrap();
        let cfg = FitConfig {
            hidden_size: 8,
            num_layers: 1,
            epochs: 2,
            learning_rate: 1e-2,
            ..Default::default()
        };
        oracle.fit(&data, &cfg).unwrap();
        let probe = oracle.dataset_to_oracle_x(data.x()).unwrap();
        (oracle, probe)
    }

    #[test]
    fn snapshot_roundtrips_bit_identically() {
        let (oracle, probe) = trained_oracle();
        let model = &oracle.fitted().unwrap().model;

        let json = model.to_json_string().unwrap();
        let loaded = FullyConnectedModel::from_json_str(&json).unwrap();

        let mut sa = model.scratch();
        let mut sb = loaded.scratch();
        for row in probe.chunks_exact(model.input_len()) {
            assert_eq!(model.forward(row, &mut sa), loaded.forward(row, &mut sb));
        }
    }

    #[test]
    fn archive_roundtrips_model_and_correlation() {
        let (oracle, probe) = trained_oracle();
        let before = oracle.predict(&probe).unwrap();
        let rho = oracle.rank_correlation().unwrap();

        let mut buf = Cursor::new(Vec::new());
        oracle.save(&mut buf).unwrap();
        buf.set_position(0);

        let mut reloaded = oracle.clone();
        reloaded.fitted = None;
        reloaded.load(&mut buf).unwrap();

        assert_eq!(reloaded.predict(&probe).unwrap(), before);
        assert_eq!(reloaded.rank_correlation(), Some(rho));
    }

    #[test]
    fn archive_has_exactly_the_two_named_entries() {
        let (oracle, _) = trained_oracle();
        let mut buf = Cursor::new(Vec::new());
        oracle.save(&mut buf).unwrap();
        buf.set_position(0);

        let archive = ZipArchive::new(buf).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec![MODEL_ENTRY, RANK_CORRELATION_ENTRY]);
    }

    #[test]
    fn save_without_a_model_fails() {
        let data = DesignDataset::continuous(vec![0.0; 8], vec![0.0, 1.0, 2.0, 3.0], vec![2]);
        let oracle = FullyConnectedOracle::new(&data.unwrap(), 0.0, 2).unwrap();
        match oracle.save(Cursor::new(Vec::new())) {
            Err(Error::NoModel) => {}
            other => panic!("expected NoModel, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_snapshot_version() {
        let bad = r#"{"format_version":999,"input_len":1,"activation":{"kind":"relu"},"embedding":null,"blocks":[],"head":{"in_dim":1,"out_dim":1,"weights":[1.0],"biases":[0.0]}}"#;
        let err = FullyConnectedModel::from_json_str(bad).unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[test]
    fn rejects_layers_that_do_not_chain() {
        let model = FullyConnectedModel::build(
            &[2],
            None,
            &ModelConfig {
                hidden_size: 3,
                num_layers: 1,
                ..Default::default()
            },
            0,
        )
        .unwrap();

        let mut ser = SerializedModel::from(&model);
        ser.head.in_dim = 7;
        ser.head.weights = vec![0.0; 7];
        let err = FullyConnectedModel::try_from(ser).unwrap_err();
        assert!(format!("{err}").contains("head"));
    }

    #[test]
    fn load_reports_missing_entries() {
        // A valid zip with only one of the two entries.
        let mut buf = Cursor::new(Vec::new());
        {
            let mut w = ZipWriter::new(&mut buf);
            w.start_file(MODEL_ENTRY, SimpleFileOptions::default()).unwrap();
            w.write_all(b"{}").unwrap();
            w.finish().unwrap();
        }
        buf.set_position(0);

        let (mut oracle, _) = trained_oracle();
        let err = oracle.load(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }
}
