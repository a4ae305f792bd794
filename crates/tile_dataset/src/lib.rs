//! Columnar tile container for train/validation image data.
//!
//! A container is a single binary file holding four named row-aligned arrays
//! (`train_img`, `train_labels`, `val_img`, `val_labels`), read lazily
//! through a memory map. Subsets are deterministic prefixes; labels are
//! integer class indices converted to one-hot at batch time.

pub mod batch;
pub mod container;
pub mod dataset;
pub mod types;

pub use batch::{batch_windows, load_batch, BatchIter, TileBatch};
pub use container::{TileContainer, TileContainerWriter, FORMAT_VERSION, MAGIC};
pub use dataset::{one_hot, subset_lengths, TileDataset, TRAIN_FRACTION, VAL_FRACTION};
pub use types::{
    ArrayDType, ArrayMeta, ContainerHeader, DatasetResult, Endianness, Split, TileDatasetError,
};

/// Named arrays every training container must expose.
pub const TRAIN_IMAGES: &str = "train_img";
pub const TRAIN_LABELS: &str = "train_labels";
pub const VAL_IMAGES: &str = "val_img";
pub const VAL_LABELS: &str = "val_labels";
