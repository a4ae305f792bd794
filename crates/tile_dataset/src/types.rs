//! Core types and error definitions for the tile container.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, TileDatasetError>;

#[derive(Debug, Error)]
pub enum TileDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} is not a tile container (bad magic)")]
    BadMagic { path: PathBuf },
    #[error("container {path} is big-endian; only little-endian payloads are supported")]
    UnsupportedEndianness { path: PathBuf },
    #[error("container {path} has no array named {name}")]
    MissingArray { path: PathBuf, name: String },
    #[error("array {name} in {path} is truncated or out of bounds")]
    Truncated { path: PathBuf, name: String },
    #[error("checksum mismatch for array {name} in {path}")]
    ChecksumMismatch { path: PathBuf, name: String },
    #[error("requested {requested} rows from {name} but only {available} are stored")]
    SubsetOutOfRange {
        name: String,
        requested: usize,
        available: usize,
    },
    #[error("train labels span {train} classes but validation labels span {val}")]
    ClassMismatch { train: usize, val: usize },
    #[error("label {label} out of range for {classes} configured classes")]
    LabelOutOfRange { label: i64, classes: usize },
    #[error("{0}")]
    Other(String),
}

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayDType {
    U8,
    F32,
}

impl ArrayDType {
    pub fn elem_bytes(&self) -> usize {
        match self {
            ArrayDType::U8 => 1,
            ArrayDType::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// Metadata for one named array. Offsets are relative to the start of the
/// data section (the byte after the JSON header).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub name: String,
    pub dtype: ArrayDType,
    /// Row-major shape; the first dimension is the row count.
    pub shape: Vec<usize>,
    pub byte_offset: u64,
    pub byte_len: u64,
    /// Hex-encoded SHA256 of the array payload (optional until populated).
    pub checksum_sha256: Option<String>,
}

impl ArrayMeta {
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per row (product of the non-leading dimensions).
    pub fn row_elems(&self) -> usize {
        self.shape.iter().skip(1).product::<usize>().max(1)
    }

    pub fn row_bytes(&self) -> usize {
        self.row_elems() * self.dtype.elem_bytes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub version: u32,
    pub created_at_ms: u64,
    pub endianness: Endianness,
    pub arrays: Vec<ArrayMeta>,
}

/// Which side of the train/validation split to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn image_array(&self) -> &'static str {
        match self {
            Split::Train => crate::TRAIN_IMAGES,
            Split::Val => crate::VAL_IMAGES,
        }
    }

    pub fn label_array(&self) -> &'static str {
        match self {
            Split::Train => crate::TRAIN_LABELS,
            Split::Val => crate::VAL_LABELS,
        }
    }
}
